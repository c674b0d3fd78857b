use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Vu, VuPool};
use crate::error::{Error, Result};
use crate::stats::{Registry, Sample, ITERATIONS, ITERATION_DURATION, ITERATION_FAILED};

struct Worker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

// ─── Worker group ────────────────────────────────────────────────

/// The set of running worker loops, one per active VU slot.
///
/// Every worker's stop token is a child of the run context, so cancelling
/// the run stops them all while [`scale`](Self::scale) can stop them one by one.
pub struct VuGroup {
    pool: Arc<VuPool>,
    registry: Arc<Registry>,
    ctx: CancellationToken,
    active: Vec<Worker>,
    draining: Vec<JoinHandle<()>>,
    spawned: u64,
}

impl VuGroup {
    pub fn new(pool: Arc<VuPool>, registry: Arc<Registry>, ctx: CancellationToken) -> Self {
        Self {
            pool,
            registry,
            ctx,
            active: Vec::new(),
            draining: Vec::new(),
            spawned: 0,
        }
    }

    /// Launches the initial workers.
    pub fn start(&mut self, vus: usize) -> Result<()> {
        self.scale(vus)
    }

    /// Number of workers that haven't been told to stop.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Workers launched over the group's lifetime.
    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    /// Brings the active worker count to `target`. Removed workers finish
    /// their current iteration before putting their VU back. Calling again
    /// with the same target does nothing.
    pub fn scale(&mut self, target: usize) -> Result<()> {
        if target > self.pool.capacity() {
            return Err(Error::PoolExhausted {
                requested: target,
                capacity: self.pool.capacity(),
            });
        }
        self.draining.retain(|handle| !handle.is_finished());

        let current = self.active.len();
        if target == current {
            return Ok(());
        }
        tracing::debug!(from = current, to = target, "scaling VUs");

        while self.active.len() < target {
            let stop = self.ctx.child_token();
            let handle = tokio::spawn(worker_loop(
                self.pool.clone(),
                self.registry.clone(),
                stop.clone(),
            ));
            self.active.push(Worker { stop, handle });
            self.spawned += 1;
        }
        while self.active.len() > target {
            if let Some(worker) = self.active.pop() {
                worker.stop.cancel();
                self.draining.push(worker.handle);
            }
        }
        Ok(())
    }

    /// Stops every worker and waits until each has put its VU back.
    pub async fn stop(&mut self) {
        let mut handles = std::mem::take(&mut self.draining);
        for worker in self.active.drain(..) {
            worker.stop.cancel();
            handles.push(worker.handle);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
    }
}

// ─── Iterations ──────────────────────────────────────────────────

async fn worker_loop(pool: Arc<VuPool>, registry: Arc<Registry>, stop: CancellationToken) {
    let mut vu = tokio::select! {
        _ = stop.cancelled() => return,
        vu = pool.checkout() => vu,
    };

    while !stop.is_cancelled() {
        iterate(vu.as_mut(), &registry, &stop).await;
    }
    pool.put_back(vu);
}

/// Runs one iteration and records its built-in metrics. Iteration errors
/// are logged, never returned.
async fn iterate(vu: &mut dyn Vu, registry: &Registry, ctx: &CancellationToken) {
    let started = Instant::now();
    let result = vu.run_once(ctx).await;
    let took_ms = started.elapsed().as_secs_f64() * 1000.0;

    registry.add(Sample::new(ITERATIONS, 1.0));
    registry.add(Sample::new(ITERATION_DURATION, took_ms));
    registry.add(Sample::new(ITERATION_FAILED, if result.is_err() { 1.0 } else { 0.0 }));

    if let Err(e) = result {
        tracing::error!(error = %e, "uncaught error in iteration");
    }
}

/// Single-iteration mode: one VU, one iteration, no workers.
pub async fn run_single(pool: &VuPool, registry: &Registry, ctx: &CancellationToken) {
    let mut vu = pool.checkout().await;
    iterate(vu.as_mut(), registry, ctx).await;
    pool.put_back(vu);
}
