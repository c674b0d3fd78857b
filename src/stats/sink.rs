use std::collections::BTreeMap;

use super::trend::TrendSink;
use super::StatKind;

/// Per-stat aggregate. The accumulator wraps each one in a lock; the sink
/// itself is plain data.
#[derive(Debug, Clone)]
pub enum Sink {
    Counter(CounterSink),
    Gauge(GaugeSink),
    Trend(TrendSink),
    Rate(RateSink),
}

impl Sink {
    pub fn new(kind: StatKind) -> Self {
        match kind {
            StatKind::Counter => Self::Counter(CounterSink::default()),
            StatKind::Gauge => Self::Gauge(GaugeSink::default()),
            StatKind::Trend => Self::Trend(TrendSink::new()),
            StatKind::Rate => Self::Rate(RateSink::default()),
        }
    }

    pub fn kind(&self) -> StatKind {
        match self {
            Self::Counter(_) => StatKind::Counter,
            Self::Gauge(_) => StatKind::Gauge,
            Self::Trend(_) => StatKind::Trend,
            Self::Rate(_) => StatKind::Rate,
        }
    }

    pub fn add(&mut self, value: f64) {
        match self {
            Self::Counter(s) => s.add(value),
            Self::Gauge(s) => s.add(value),
            Self::Trend(s) => s.add(value),
            Self::Rate(s) => s.add(value),
        }
    }

    /// Number of samples folded in so far.
    pub fn samples(&self) -> u64 {
        match self {
            Self::Counter(s) => s.samples,
            Self::Gauge(s) => s.samples,
            Self::Trend(s) => s.count(),
            Self::Rate(s) => s.total,
        }
    }

    /// Quantile query; only trends carry a distribution.
    pub fn percentile(&self, q: f64) -> Option<f64> {
        match self {
            Self::Trend(s) => Some(s.percentile(q)),
            _ => None,
        }
    }

    /// Read-only named values, as bound into threshold scripts.
    pub fn format(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Counter(s) => BTreeMap::from([("count".to_string(), s.sum)]),
            Self::Gauge(s) => BTreeMap::from([
                ("value".to_string(), s.last),
                ("min".to_string(), s.min),
                ("max".to_string(), s.max),
            ]),
            Self::Trend(s) => s.format(),
            Self::Rate(s) => BTreeMap::from([
                ("rate".to_string(), s.rate()),
                ("passes".to_string(), s.trues as f64),
                ("fails".to_string(), (s.total - s.trues) as f64),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CounterSink {
    pub sum: f64,
    samples: u64,
}

impl CounterSink {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.samples += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct GaugeSink {
    pub last: f64,
    pub min: f64,
    pub max: f64,
    samples: u64,
}

impl GaugeSink {
    fn add(&mut self, value: f64) {
        if self.samples == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.last = value;
        self.samples += 1;
    }
}

/// Counts non-zero ("truthy") samples against all samples.
#[derive(Debug, Clone, Default)]
pub struct RateSink {
    pub trues: u64,
    pub total: u64,
}

impl RateSink {
    fn add(&mut self, value: f64) {
        self.total += 1;
        if value != 0.0 && !value.is_nan() {
            self.trues += 1;
        }
    }

    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.trues as f64 / self.total as f64
        }
    }
}
