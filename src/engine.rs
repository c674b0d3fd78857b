use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::plan::{poll_vu_ramping, ramp::RAMP_TICK, Plan, Stage};
use crate::stats::{Accumulator, Registry, Sample, VUS};
use crate::status::RunState;
use crate::summary::Summary;
use crate::threshold::ThresholdSet;
use crate::vu::{run_single, Runner, VuGroup, VuPool};

/// How often buffered samples are flushed to the backends.
pub const SUBMIT_TICK: Duration = Duration::from_secs(1);
/// How often thresholds are evaluated while the run is live.
pub const THRESHOLD_TICK: Duration = Duration::from_secs(1);

// ─── Configuration / outcome ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub plan: Plan,
    /// Run a single iteration on one VU, with no deadline.
    pub once: bool,
    /// Print a summary this often while running.
    pub summary_interval: Option<Duration>,
    /// Install a Ctrl-C listener that cancels the run.
    pub handle_signals: bool,
    pub ramp_tick: Duration,
    pub submit_tick: Duration,
    pub threshold_tick: Duration,
}

impl RunConfig {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            once: false,
            summary_interval: None,
            handle_signals: false,
            ramp_tick: RAMP_TICK,
            submit_tick: SUBMIT_TICK,
            threshold_tick: THRESHOLD_TICK,
        }
    }

    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::new(Plan::new(vec![Stage::once()]))
        }
    }
}

/// What a finished run hands back to the caller, which decides the exit code.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// True if any threshold failed at any point during the run.
    pub thresholds_failed: bool,
    pub summary: Summary,
}

// ─── Engine ──────────────────────────────────────────────────────

/// Owns everything a run needs. `registry` must already deliver to
/// `accumulator`, since thresholds and summaries read from it.
pub struct Engine {
    runner: Arc<dyn Runner>,
    registry: Arc<Registry>,
    accumulator: Arc<Accumulator>,
    thresholds: ThresholdSet,
    state: Arc<RunState>,
}

impl Engine {
    pub fn new(
        runner: Arc<dyn Runner>,
        registry: Arc<Registry>,
        accumulator: Arc<Accumulator>,
        thresholds: ThresholdSet,
    ) -> Self {
        let state = Arc::new(RunState::new(accumulator.clone()));
        Self {
            runner,
            registry,
            accumulator,
            thresholds,
            state,
        }
    }

    /// Shared live state, for the status API.
    pub fn state(&self) -> Arc<RunState> {
        self.state.clone()
    }

    /// Pre-warms the pool, drives the plan until its deadline or until `ctx`
    /// is cancelled, then drains every worker and runs the final flush and
    /// threshold pass. Only setup failures are returned as errors.
    pub async fn run(mut self, config: RunConfig, ctx: CancellationToken) -> Result<RunReport> {
        let plan = &config.plan;
        let pool_size = if config.once { 1 } else { plan.max_vus() };
        let pool = Arc::new(VuPool::prewarm(self.runner.as_ref(), pool_size).await?);

        let run_ctx = ctx.child_token();
        if config.handle_signals {
            tokio::spawn(listen_for_signals(run_ctx.clone()));
        }

        self.state.mark_started();
        tracing::info!(
            run_id = self.state.run_id(),
            vus = pool_size,
            duration = %humantime::format_duration(plan.total_duration()),
            "starting run"
        );

        if config.once {
            self.set_vus(1);
            run_single(&pool, &self.registry, &run_ctx).await;
        } else {
            self.drive(&config, pool, &run_ctx).await?;
        }
        run_ctx.cancel();

        self.set_vus(0);
        self.registry.submit();
        self.evaluate_thresholds();
        self.state.mark_finished();

        let summary = self.state.summary();
        tracing::info!(elapsed_secs = summary.elapsed_secs, "run finished");
        Ok(RunReport {
            thresholds_failed: self.thresholds.any_failed(),
            summary,
        })
    }

    async fn drive(
        &mut self,
        config: &RunConfig,
        pool: Arc<VuPool>,
        ctx: &CancellationToken,
    ) -> Result<()> {
        let plan = &config.plan;
        let mut group = VuGroup::new(pool, self.registry.clone(), ctx.child_token());
        group.start(plan.initial_vus())?;
        self.set_vus(group.active());

        let mut targets = poll_vu_ramping(ctx.clone(), plan.clone(), config.ramp_tick);
        let mut submits = ticker(config.submit_tick);
        let mut evaluations = ticker(config.threshold_tick);
        let mut summaries = config.summary_interval.map(ticker);

        let deadline = tokio::time::sleep(plan.total_duration());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    tracing::info!("run cancelled, draining VUs");
                    break;
                }
                _ = &mut deadline => break,
                Some(target) = targets.recv() => {
                    match group.scale(target) {
                        Ok(()) => self.set_vus(group.active()),
                        Err(e) => tracing::error!(error = %e, "couldn't scale VUs"),
                    }
                }
                Some(_) = submits.next() => {
                    self.registry.submit();
                }
                Some(_) = evaluations.next() => self.evaluate_thresholds(),
                Some(_) = next_tick(&mut summaries) => {
                    if let Err(e) = self.state.summary().print() {
                        tracing::error!(error = %e, "couldn't print summary");
                    }
                }
            }
        }

        group.stop().await;
        Ok(())
    }

    fn set_vus(&self, vus: usize) {
        self.registry.add(Sample::new(VUS, vus as f64));
        self.state.set_vus(vus);
    }

    /// A script error taints its threshold and skips the rest of that
    /// metric's batch; other metrics are still judged.
    fn evaluate_thresholds(&mut self) {
        if self.thresholds.is_empty() {
            return;
        }
        // each error is logged with its metric by `evaluate`
        if self.thresholds.evaluate(&self.accumulator).is_err() {
            tracing::debug!("threshold pass finished with script errors");
        }
        self.state.record_thresholds(&self.thresholds);
    }
}

// ─── Timers / signals ────────────────────────────────────────────

fn ticker(period: Duration) -> IntervalStream {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    IntervalStream::new(timer)
}

async fn next_tick(ticks: &mut Option<IntervalStream>) -> Option<Instant> {
    match ticks {
        Some(ticks) => ticks.next().await,
        None => std::future::pending().await,
    }
}

async fn listen_for_signals(ctx: CancellationToken) {
    tokio::select! {
        _ = ctx.cancelled() => {}
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => {
                tracing::warn!("interrupted, stopping");
                ctx.cancel();
            }
            Err(e) => tracing::error!(error = %e, "couldn't listen for Ctrl-C"),
        }
    }
}
