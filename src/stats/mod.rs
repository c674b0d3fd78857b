pub mod accumulate;
pub mod registry;
pub mod sink;
pub mod trend;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use crate::error::Result;

pub use accumulate::Accumulator;
pub use registry::{Registry, RegistryBuilder};
pub use sink::Sink;

/// Sample tags; ordered so group keys come out identical for equal tag sets.
pub type Tags = BTreeMap<String, String>;

// ─── Stats ───────────────────────────────────────────────────────

/// How a stat's samples are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    /// Values are summed.
    Counter,
    /// Last value wins.
    Gauge,
    /// Distribution; answers percentile queries.
    Trend,
    /// Fraction of non-zero samples.
    Rate,
}

/// A named metric. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Stat {
    pub name: Cow<'static, str>,
    pub kind: StatKind,
}

impl Stat {
    pub const fn new(name: &'static str, kind: StatKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind,
        }
    }

    pub fn named(name: impl Into<String>, kind: StatKind) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            kind,
        }
    }
}

/// Current number of active VUs.
pub const VUS: Stat = Stat::new("vus", StatKind::Gauge);
/// One per completed iteration.
pub const ITERATIONS: Stat = Stat::new("iterations", StatKind::Counter);
/// Wall time of one iteration, in milliseconds.
pub const ITERATION_DURATION: Stat = Stat::new("iteration_duration", StatKind::Trend);
/// 1 for an iteration that returned an error, 0 otherwise.
pub const ITERATION_FAILED: Stat = Stat::new("iteration_failed", StatKind::Rate);

// ─── Samples ─────────────────────────────────────────────────────

/// A single observation. Built by a VU, never modified after it is added
/// to the registry (apart from the registry merging in its extra tags).
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub stat: Stat,
    pub tags: Tags,
    pub value: f64,
    pub time: DateTime<Utc>,
}

impl Sample {
    pub fn new(stat: Stat, value: f64) -> Self {
        Self {
            stat,
            tags: Tags::new(),
            value,
            time: Utc::now(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

// ─── Backends ────────────────────────────────────────────────────

/// Consumer of sample batches. Errors are logged by the registry and never
/// stop delivery to the other backends.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn submit(&self, batch: &[Sample]) -> Result<()>;
}

// ─── Filtering ───────────────────────────────────────────────────

/// Name-based metric filter built from `--select` / `--exclude`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    select: HashSet<String>,
    exclude: HashSet<String>,
}

impl Filter {
    pub fn new<S: AsRef<str>>(exclude: &[S], select: &[S]) -> Self {
        Self {
            select: select.iter().map(|s| s.as_ref().to_string()).collect(),
            exclude: exclude.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    /// An empty selection lets everything through that isn't excluded.
    pub fn allows(&self, name: &str) -> bool {
        if self.exclude.contains(name) {
            return false;
        }
        self.select.is_empty() || self.select.contains(name)
    }
}

/// Parses `--tag` values: `key=value`, `key:value`, or a bare `value`
/// (used as both key and value). An empty key falls back to the value.
pub fn parse_tags<S: AsRef<str>>(lines: &[S]) -> Tags {
    let mut tags = Tags::new();
    for line in lines {
        let line = line.as_ref();
        match line.find([':', '=']) {
            None => {
                tags.insert(line.to_string(), line.to_string());
            }
            Some(idx) => {
                let (key, value) = (&line[..idx], &line[idx + 1..]);
                let key = if key.is_empty() { value } else { key };
                tags.insert(key.to_string(), value.to_string());
            }
        }
    }
    tags
}
