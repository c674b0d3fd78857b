use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use rampload::engine::{Engine, RunConfig};
use rampload::plan::{parse_stages, Plan};
use rampload::stats::{Accumulator, Registry, Sample, Stat, StatKind};
use rampload::threshold::ThresholdSet;
use rampload::vu::{Runner, Vu};
use rampload::{Error, Result};

const CHECKS: Stat = Stat::new("checks", StatKind::Rate);

// ─── Fake runner ─────────────────────────────────────────────────

struct FakeRunner {
    registry: Arc<Registry>,
    iterations: Arc<AtomicU64>,
    fail_every: u64,
    broken_factory: bool,
}

struct FakeVu {
    id: u64,
    registry: Arc<Registry>,
    iterations: Arc<AtomicU64>,
    fail_every: u64,
}

#[async_trait]
impl Runner for FakeRunner {
    async fn new_vu(&self, id: u64) -> Result<Box<dyn Vu>> {
        if self.broken_factory {
            return Err(Error::Iteration("factory offline".into()));
        }
        Ok(Box::new(FakeVu {
            id,
            registry: self.registry.clone(),
            iterations: self.iterations.clone(),
            fail_every: self.fail_every,
        }))
    }
}

#[async_trait]
impl Vu for FakeVu {
    async fn run_once(&mut self, _ctx: &CancellationToken) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let n = self.iterations.fetch_add(1, Ordering::SeqCst) + 1;
        let ok = self.fail_every == 0 || n % self.fail_every != 0;
        self.registry.add(
            Sample::new(CHECKS, if ok { 1.0 } else { 0.0 }).with_tag("vu", self.id.to_string()),
        );
        if ok {
            Ok(())
        } else {
            Err(Error::Iteration(format!("iteration {n} failed")))
        }
    }
}

struct Harness {
    engine: Engine,
    iterations: Arc<AtomicU64>,
}

fn harness(thresholds: &str, fail_every: u64, broken_factory: bool) -> Harness {
    let accumulator = Arc::new(Accumulator::default());
    let registry = Arc::new(Registry::builder().backend(accumulator.clone()).build());
    let iterations = Arc::new(AtomicU64::new(0));
    let runner = Arc::new(FakeRunner {
        registry: registry.clone(),
        iterations: iterations.clone(),
        fail_every,
        broken_factory,
    });
    let thresholds: ThresholdSet = serde_json::from_str(thresholds).unwrap();
    Harness {
        engine: Engine::new(runner, registry, accumulator, thresholds),
        iterations,
    }
}

fn plan(specs: &[&str], total_secs: u64) -> Plan {
    Plan::new(parse_stages(specs, Duration::from_secs(total_secs)).unwrap())
}

// ─── Tests ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ramps_up_and_reports() {
    let h = harness(r#"{"iterations": ["count > 10"], "checks": ["rate == 1"]}"#, 0, false);
    let state = h.engine.state();

    let report = h
        .engine
        .run(RunConfig::new(plan(&["0-4:2s", "4:2s"], 4)), CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.thresholds_failed);
    assert!(!state.is_running());
    assert_eq!(state.vus(), 0);

    let metrics = &report.summary.metrics;
    assert_eq!(metrics["vus"]["value"], 0.0);
    assert_eq!(metrics["vus"]["max"], 4.0);
    assert_eq!(
        metrics["iterations"]["count"] as u64,
        h.iterations.load(Ordering::SeqCst)
    );
    assert!(metrics["iteration_duration"]["min"] >= 100.0);
    assert_eq!(metrics["iteration_failed"]["rate"], 0.0);
    assert_eq!(report.summary.thresholds.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn early_failure_stays_failed() {
    // at most 50 iterations exist by the first evaluation tick
    let h = harness(r#"{"iterations": ["count > 60"]}"#, 0, false);
    let mut config = RunConfig::new(plan(&["5:5s"], 5));
    config.submit_tick = Duration::from_millis(250);
    let report = h.engine.run(config, CancellationToken::new()).await.unwrap();

    assert!(report.summary.metrics["iterations"]["count"] > 60.0);
    assert!(report.thresholds_failed);
    assert!(report.summary.thresholds[0].failed);
}

#[tokio::test(start_paused = true)]
async fn iteration_errors_are_counted_not_fatal() {
    let h = harness(r#"{"iteration_failed": ["rate < 0.1"]}"#, 4, false);
    let report = h
        .engine
        .run(RunConfig::new(plan(&["2:3s"], 3)), CancellationToken::new())
        .await
        .unwrap();

    let failed = &report.summary.metrics["iteration_failed"];
    assert!((failed["rate"] - 0.25).abs() < 0.05, "rate {}", failed["rate"]);
    assert!(report.thresholds_failed);
}

#[tokio::test(start_paused = true)]
async fn once_runs_a_single_iteration() {
    let h = harness("{}", 0, false);
    let report = h
        .engine
        .run(RunConfig::once(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.iterations.load(Ordering::SeqCst), 1);
    assert_eq!(report.summary.metrics["iterations"]["count"], 1.0);
    assert!(!report.thresholds_failed);
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_and_still_reports() {
    let h = harness("{}", 0, false);
    let ctx = CancellationToken::new();
    let run = tokio::spawn(
        h.engine
            .run(RunConfig::new(plan(&["3:10m"], 600)), ctx.clone()),
    );

    tokio::time::sleep(Duration::from_millis(1_550)).await;
    ctx.cancel();
    let report = tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("run didn't stop")
        .unwrap()
        .unwrap();

    let done = h.iterations.load(Ordering::SeqCst);
    assert!(done >= 45, "{done} iterations");
    assert_eq!(report.summary.metrics["iterations"]["count"] as u64, done);
    assert!(report.summary.elapsed_secs < 2.0);
}

#[tokio::test(start_paused = true)]
async fn broken_factory_aborts_before_any_iteration() {
    let h = harness("{}", 0, true);
    let err = h
        .engine
        .run(RunConfig::new(plan(&["2:1s"], 1)), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::VuCreation(_)));
    assert_eq!(h.iterations.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn grouped_thresholds_judge_every_partition() {
    let accumulator = Arc::new(Accumulator::new(Default::default(), vec!["vu".to_string()]));
    let registry = Arc::new(Registry::builder().backend(accumulator.clone()).build());
    let iterations = Arc::new(AtomicU64::new(0));
    let runner = Arc::new(FakeRunner {
        registry: registry.clone(),
        iterations: iterations.clone(),
        fail_every: 0,
        broken_factory: false,
    });
    let thresholds: ThresholdSet = serde_json::from_str(r#"{"checks": ["rate == 1"]}"#).unwrap();
    let engine = Engine::new(runner, registry, accumulator, thresholds);

    let report = engine
        .run(RunConfig::new(plan(&["3:2s"], 2)), CancellationToken::new())
        .await
        .unwrap();

    let partitions: Vec<_> = report
        .summary
        .metrics
        .keys()
        .filter(|k| k.starts_with("checks{"))
        .collect();
    assert_eq!(partitions.len(), 3);
    assert!(!report.thresholds_failed);
}

#[tokio::test(start_paused = true)]
async fn broken_threshold_does_not_mask_other_metrics() {
    // `p()` is undefined for a Rate metric, so `checks` errors on every pass
    let h = harness(r#"{"checks": ["p(50) < 1"], "iterations": ["count < 0"]}"#, 0, false);
    let report = h
        .engine
        .run(RunConfig::new(plan(&["2:2s"], 2)), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.thresholds_failed);
    assert!(report.summary.thresholds.iter().all(|t| t.failed));
}
