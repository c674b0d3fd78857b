use hdrhistogram::Histogram;
use std::collections::BTreeMap;

// ─── Configuration ───────────────────────────────────────────────

/// Values are stored as integer thousandths (µs when the trend is in ms).
const SCALE: f64 = 1_000.0;

/// 3 significant figures keeps percentile error under 0.1 %.
const HIST_SIGFIG: u8 = 3;

/// Percentiles exposed by `format()` next to min/max/avg.
const REPORTED: &[(&str, f64)] = &[("med", 0.50), ("p90", 0.90), ("p95", 0.95), ("p99", 0.99)];

/// Distribution aggregate for `Trend` stats.
///
/// The histogram answers percentile queries within its precision; count,
/// sum, min and max are tracked exactly alongside it.
#[derive(Debug, Clone)]
pub struct TrendSink {
    hist: Histogram<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for TrendSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TrendSink {
    pub fn new() -> Self {
        Self {
            // auto-resizing, so any non-negative value fits
            hist: Histogram::<u64>::new(HIST_SIGFIG)
                .expect("3 significant figures is a valid histogram precision"),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let value = value.max(0.0);
        self.hist.saturating_record((value * SCALE).round() as u64);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Value at quantile `q` (0.0 ..= 1.0). Zero while empty.
    pub fn percentile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let q = q.clamp(0.0, 1.0);
        if q == 0.0 {
            return self.min;
        }
        if q == 1.0 {
            return self.max;
        }
        let v = self.hist.value_at_quantile(q) as f64 / SCALE;
        v.clamp(self.min, self.max)
    }

    pub fn format(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        out.insert("count".to_string(), self.count as f64);
        out.insert("min".to_string(), self.min());
        out.insert("max".to_string(), self.max());
        out.insert("avg".to_string(), self.avg());
        for (name, q) in REPORTED {
            out.insert((*name).to_string(), self.percentile(*q));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= b.abs() * 0.01 + 1e-9
    }

    #[test]
    fn empty_trend_reports_zeros() {
        let t = TrendSink::new();
        assert_eq!(t.percentile(0.95), 0.0);
        let f = t.format();
        assert_eq!(f["count"], 0.0);
        assert_eq!(f["min"], 0.0);
        assert_eq!(f["avg"], 0.0);
    }

    #[test]
    fn percentiles_on_uniform_values() {
        let mut t = TrendSink::new();
        for v in 1..=1000 {
            t.add(v as f64);
        }
        assert_eq!(t.count(), 1000);
        assert_eq!(t.min(), 1.0);
        assert_eq!(t.max(), 1000.0);
        assert!(close(t.avg(), 500.5));
        assert!(close(t.percentile(0.5), 500.0), "{}", t.percentile(0.5));
        assert!(close(t.percentile(0.95), 950.0), "{}", t.percentile(0.95));
        assert!(close(t.percentile(0.99), 990.0), "{}", t.percentile(0.99));
        assert_eq!(t.percentile(1.0), 1000.0);
    }

    #[test]
    fn fractional_values_keep_precision() {
        let mut t = TrendSink::new();
        t.add(0.25);
        t.add(0.75);
        assert_eq!(t.min(), 0.25);
        assert_eq!(t.max(), 0.75);
        assert!(close(t.percentile(0.5), 0.25));
    }

    #[test]
    fn negative_and_nan_values() {
        let mut t = TrendSink::new();
        t.add(f64::NAN);
        assert_eq!(t.count(), 0);
        t.add(-3.0);
        assert_eq!(t.min(), 0.0);
        assert_eq!(t.count(), 1);
    }
}
