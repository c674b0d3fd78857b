use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use crate::stats::Accumulator;
use crate::summary::Summary;
use crate::threshold::{ThresholdSet, ThresholdStatus};

/// Live state of a run, written by the engine and read by the status API.
pub struct RunState {
    run_id: String,
    running: AtomicBool,
    vus: AtomicUsize,
    thresholds_failed: AtomicBool,
    started: RwLock<Option<Instant>>,
    thresholds: RwLock<Vec<ThresholdStatus>>,
    accumulator: Arc<Accumulator>,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub run_id: String,
    pub running: bool,
    pub vus: usize,
    pub elapsed_secs: f64,
    pub thresholds_failed: bool,
}

impl RunState {
    pub fn new(accumulator: Arc<Accumulator>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            running: AtomicBool::new(false),
            vus: AtomicUsize::new(0),
            thresholds_failed: AtomicBool::new(false),
            started: RwLock::new(None),
            thresholds: RwLock::new(Vec::new()),
            accumulator,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mark_started(&self) {
        *self.started.write() = Some(Instant::now());
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn mark_finished(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_vus(&self, vus: usize) {
        self.vus.store(vus, Ordering::Relaxed);
    }

    pub fn vus(&self) -> usize {
        self.vus.load(Ordering::Relaxed)
    }

    /// Zero before the run starts.
    pub fn elapsed_secs(&self) -> f64 {
        let started = *self.started.read();
        started.map_or(0.0, |t| t.elapsed().as_secs_f64())
    }

    /// Publishes the evaluator's latest view of the thresholds.
    pub fn record_thresholds(&self, set: &ThresholdSet) {
        *self.thresholds.write() = set.statuses();
        self.thresholds_failed.store(set.any_failed(), Ordering::SeqCst);
    }

    pub fn thresholds_failed(&self) -> bool {
        self.thresholds_failed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Status {
        Status {
            run_id: self.run_id.clone(),
            running: self.is_running(),
            vus: self.vus(),
            elapsed_secs: self.elapsed_secs(),
            thresholds_failed: self.thresholds_failed(),
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::collect(
            &self.run_id,
            self.elapsed_secs(),
            &self.accumulator,
            self.thresholds.read().clone(),
        )
    }
}
