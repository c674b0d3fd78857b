use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use crate::error::Result;
use crate::stats::Accumulator;
use crate::threshold::ThresholdStatus;

/// Point-in-time view of a run: every sink's `format()` values keyed by
/// sink name (with group tags when grouping), plus threshold outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub run_id: String,
    pub elapsed_secs: f64,
    pub metrics: BTreeMap<String, BTreeMap<String, f64>>,
    pub thresholds: Vec<ThresholdStatus>,
}

impl Summary {
    pub fn collect(
        run_id: &str,
        elapsed_secs: f64,
        accumulator: &Accumulator,
        thresholds: Vec<ThresholdStatus>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            elapsed_secs,
            metrics: accumulator.snapshot(),
            thresholds,
        }
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdStatus> {
        self.thresholds.iter().filter(|t| t.failed)
    }

    /// Pretty-printed JSON followed by a newline.
    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)?;
        Ok(())
    }

    pub fn print(&self) -> Result<()> {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        self.write_to(&mut lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Backend, Sample, ITERATIONS, ITERATION_DURATION};

    #[test]
    fn collects_every_sink_and_threshold() {
        let acc = Accumulator::default();
        acc.submit(&[
            Sample::new(ITERATIONS, 1.0),
            Sample::new(ITERATIONS, 1.0),
            Sample::new(ITERATION_DURATION, 12.0),
        ])
        .unwrap();

        let statuses = vec![
            ThresholdStatus {
                metric: "iterations".into(),
                source: "count > 5".into(),
                failed: true,
            },
            ThresholdStatus {
                metric: "iteration_duration".into(),
                source: "max < 100".into(),
                failed: false,
            },
        ];
        let summary = Summary::collect("run-1", 2.5, &acc, statuses);

        assert_eq!(summary.metrics["iterations"]["count"], 2.0);
        assert_eq!(summary.metrics["iteration_duration"]["max"], 12.0);
        let failed: Vec<_> = summary.failed_thresholds().map(|t| t.source.as_str()).collect();
        assert_eq!(failed, vec!["count > 5"]);
    }

    #[test]
    fn writes_pretty_json() {
        let summary = Summary::collect("abc", 0.0, &Accumulator::default(), Vec::new());
        let mut buf = Vec::new();
        summary.write_to(&mut buf).unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["run_id"], "abc");
        assert!(value["metrics"].as_object().unwrap().is_empty());
    }
}
