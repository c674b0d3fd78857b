pub mod script;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::stats::{Accumulator, Sink};
use script::{Runtime, Script, ScriptError};

// ─── Single threshold ────────────────────────────────────────────

/// One pass/fail expression. `failed` is sticky: once a run evaluates to
/// false it stays set for the threshold's lifetime.
#[derive(Debug, Clone)]
pub struct Threshold {
    source: String,
    script: Script,
    failed: bool,
}

impl Threshold {
    pub fn new(source: impl Into<String>) -> std::result::Result<Self, ScriptError> {
        let source = source.into();
        let script = Script::compile(&source)?;
        Ok(Self {
            source,
            script,
            failed: false,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free identifiers the expression reads, fixed at construction.
    pub fn refs(&self) -> &BTreeSet<String> {
        self.script.refs()
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Evaluates without touching the sticky flag.
    pub fn run_no_taint(&self, rt: &mut Runtime) -> std::result::Result<bool, ScriptError> {
        Ok(self.script.run(rt)?.truthy())
    }

    /// Evaluates and taints on a false result or a script error. Returns
    /// this run's result, not the sticky flag.
    pub fn run(&mut self, rt: &mut Runtime) -> std::result::Result<bool, ScriptError> {
        let passed = self.run_no_taint(rt);
        if !matches!(passed, Ok(true)) {
            self.failed = true;
        }
        passed
    }
}

// ─── Collection sharing one sandbox ──────────────────────────────

/// Ordered thresholds evaluated in one shared runtime.
///
/// (De)serializes as the ordered list of source strings.
pub struct Thresholds {
    runtime: Runtime,
    thresholds: Vec<Threshold>,
}

impl std::fmt::Debug for Thresholds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.sources()).finish()
    }
}

impl Thresholds {
    pub fn new<S: AsRef<str>>(sources: &[S]) -> Result<Self> {
        let thresholds = sources
            .iter()
            .enumerate()
            .map(|(index, src)| {
                Threshold::new(src.as_ref())
                    .map_err(|source| Error::InvalidThreshold { index, source })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            runtime: Runtime::new(),
            thresholds,
        })
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.thresholds.iter().map(Threshold::source)
    }

    /// Rebinds the sandbox to `sink`: `p()` queries it and every value of
    /// its `format()` becomes a global.
    pub fn update_vm(&mut self, sink: &Sink) {
        self.runtime.bind_sink(sink.clone());
    }

    /// Runs every threshold in order against the bound sink. True only if
    /// each one passed on this run. The first script error taints that
    /// threshold and aborts the batch.
    pub fn run_all(&mut self) -> Result<bool> {
        let mut all_passed = true;
        for (index, threshold) in self.thresholds.iter_mut().enumerate() {
            let passed = threshold
                .run(&mut self.runtime)
                .map_err(|source| Error::ThresholdRuntime { index, source })?;
            all_passed &= passed;
        }
        Ok(all_passed)
    }

    pub fn run(&mut self, sink: &Sink) -> Result<bool> {
        self.update_vm(sink);
        self.run_all()
    }

    /// Whether any threshold has ever failed.
    pub fn any_failed(&self) -> bool {
        self.thresholds.iter().any(Threshold::failed)
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.thresholds
            .iter()
            .filter(|t| t.failed())
            .map(Threshold::source)
            .collect()
    }
}

impl Serialize for Thresholds {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.sources())
    }
}

impl<'de> Deserialize<'de> for Thresholds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let sources = Vec::<String>::deserialize(deserializer)?;
        Self::new(&sources).map_err(D::Error::custom)
    }
}

// ─── Per-metric configuration ────────────────────────────────────

/// Outcome of one threshold, for summaries and the status API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdStatus {
    pub metric: String,
    pub source: String,
    pub failed: bool,
}

/// Threshold collections keyed by the metric they judge.
///
/// Serialized as `{"metric": ["expr", ...], ...}`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdSet {
    metrics: BTreeMap<String, Thresholds>,
}

impl ThresholdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: impl Into<String>, thresholds: Thresholds) {
        self.metrics.insert(metric.into(), thresholds);
    }

    /// Appends `sources` to whatever is already configured for `metric`.
    pub fn extend<S: AsRef<str>>(&mut self, metric: &str, sources: &[S]) -> Result<()> {
        let mut all: Vec<String> = self
            .metrics
            .get(metric)
            .map(|ts| ts.sources().map(str::to_string).collect())
            .unwrap_or_default();
        all.extend(sources.iter().map(|s| s.as_ref().to_string()));
        self.metrics.insert(metric.to_string(), Thresholds::new(&all)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.values().all(Thresholds::is_empty)
    }

    pub fn get(&self, metric: &str) -> Option<&Thresholds> {
        self.metrics.get(metric)
    }

    /// One evaluation tick: each configured metric is checked against every
    /// partition the accumulator holds for it. Metrics without samples yet
    /// are skipped.
    ///
    /// A script error only aborts its own metric's batch. Every error is
    /// logged with the partition it came from and the first one is
    /// returned once all metrics have been evaluated.
    pub fn evaluate(&mut self, accumulator: &Accumulator) -> Result<bool> {
        let mut all_passed = true;
        let mut first_error = None;
        for (metric, thresholds) in &mut self.metrics {
            for (key, sink) in accumulator.sinks_for(metric) {
                match thresholds.run(&sink) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(metric = %key.display(), "threshold crossed");
                        all_passed = false;
                    }
                    Err(e) => {
                        let metric = key.display();
                        tracing::error!(metric = %metric, error = %e, "threshold errored");
                        all_passed = false;
                        first_error.get_or_insert(Error::MetricThreshold {
                            metric,
                            source: Box::new(e),
                        });
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(all_passed),
        }
    }

    pub fn any_failed(&self) -> bool {
        self.metrics.values().any(Thresholds::any_failed)
    }

    pub fn statuses(&self) -> Vec<ThresholdStatus> {
        self.metrics
            .iter()
            .flat_map(|(metric, ts)| {
                ts.iter().map(move |t| ThresholdStatus {
                    metric: metric.clone(),
                    source: t.source().to_string(),
                    failed: t.failed(),
                })
            })
            .collect()
    }
}
