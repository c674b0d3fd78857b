pub mod ramp;

use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::error::{Error, Result};

pub use ramp::poll_vu_ramping;

/// VU level used for the whole run when no ramp spec is given.
pub const DEFAULT_VUS: usize = 10;

// ─── Data model ──────────────────────────────────────────────────

/// One segment of the ramp plan: move linearly from `start_vus` to
/// `end_vus` over `duration`. A zero-length stage is instantaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub start_vus: usize,
    pub end_vus: usize,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

impl Stage {
    pub fn new(start_vus: usize, end_vus: usize, duration: Duration) -> Self {
        Self {
            start_vus,
            end_vus,
            duration,
        }
    }

    /// The single-stage plan used by `--once`.
    pub fn once() -> Self {
        Self::new(1, 1, Duration::ZERO)
    }
}

fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*d).to_string())
}

/// An immutable, ordered stage list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub stages: Vec<Stage>,
}

impl Plan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest VU count any stage asks for; the pool is pre-warmed to this.
    pub fn max_vus(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.start_vus.max(s.end_vus))
            .max()
            .unwrap_or(0)
    }

    /// VU count the first stage starts at.
    pub fn initial_vus(&self) -> usize {
        self.stages.first().map_or(0, |s| s.start_vus)
    }

    /// Target VU count `elapsed` into the run.
    ///
    /// Linear interpolation inside the stage that contains `elapsed`;
    /// past the last stage the plan holds at its final `end_vus`.
    pub fn vus_at(&self, elapsed: Duration) -> usize {
        let mut offset = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = offset + stage.duration;
            if elapsed < stage_end {
                let progress =
                    (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                let start = stage.start_vus as f64;
                let end = stage.end_vus as f64;
                return (start + (end - start) * progress).round() as usize;
            }
            offset = stage_end;
        }
        self.stages.last().map_or(0, |s| s.end_vus)
    }
}

// ─── Ramp spec parsing ───────────────────────────────────────────

/// Parses `[start][-end][:duration]` specs into stages.
///
/// Each entry may itself hold several comma separated specs. Stages without
/// a duration are "fluid" and split whatever time the fixed stages leave of
/// `total` evenly between them (zero when nothing is left).
pub fn parse_stages<S: AsRef<str>>(specs: &[S], total: Duration) -> Result<Vec<Stage>> {
    let specs: Vec<&str> = specs
        .iter()
        .flat_map(|s| s.as_ref().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if specs.is_empty() {
        return Ok(vec![Stage::new(DEFAULT_VUS, DEFAULT_VUS, total)]);
    }

    let mut stages: Vec<Stage> = Vec::with_capacity(specs.len());
    let mut accounted = Duration::ZERO;
    let mut fluid = Vec::new();

    for (i, spec) in specs.iter().enumerate() {
        let (counts, duration) = match spec.split_once(':') {
            Some((counts, duration)) => (counts, Some(duration)),
            None => (*spec, None),
        };
        let (start, end) = match counts.split_once('-') {
            Some((start, end)) => (start, Some(end)),
            None => (counts, None),
        };

        // No start: carry on from where the previous stage ended
        let start_vus = if start.is_empty() {
            stages.last().map_or(0, |prev| prev.end_vus)
        } else {
            parse_count(spec, start)?
        };

        let end_vus = match end {
            Some(end) if !end.is_empty() => parse_count(spec, end)?,
            _ => start_vus,
        };

        let duration = match duration {
            Some(raw) => {
                let d = humantime::parse_duration(raw.trim()).map_err(|e| Error::InvalidStage {
                    spec: spec.to_string(),
                    reason: e.to_string(),
                })?;
                accounted += d;
                d
            }
            None => {
                fluid.push(i);
                Duration::ZERO
            }
        };

        stages.push(Stage::new(start_vus, end_vus, duration));
    }

    if !fluid.is_empty() && accounted < total {
        let share = (total - accounted) / fluid.len() as u32;
        for i in fluid {
            stages[i].duration = share;
        }
    }

    Ok(stages)
}

fn parse_count(spec: &str, raw: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|e| Error::InvalidStage {
        spec: spec.to_string(),
        reason: format!("`{raw}`: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn no_specs_means_flat_default_run() {
        let stages = parse_stages::<&str>(&[], secs(42)).unwrap();
        assert_eq!(stages, vec![Stage::new(10, 10, secs(42))]);
    }

    #[test]
    fn fixed_stages_and_interpolation() {
        let stages = parse_stages(&["0-10:30s,10-10:30s"], secs(60)).unwrap();
        assert_eq!(
            stages,
            vec![Stage::new(0, 10, secs(30)), Stage::new(10, 10, secs(30))]
        );

        let plan = Plan::new(stages);
        assert_eq!(plan.total_duration(), secs(60));
        assert_eq!(plan.max_vus(), 10);
        assert_eq!(plan.vus_at(Duration::ZERO), 0);
        assert_eq!(plan.vus_at(secs(15)), 5);
        assert_eq!(plan.vus_at(secs(45)), 10);
        assert_eq!(plan.vus_at(secs(60)), 10);
        assert_eq!(plan.vus_at(secs(600)), 10);
    }

    #[test]
    fn ramp_down_interpolates() {
        let plan = Plan::new(parse_stages(&["20-0:10s"], secs(10)).unwrap());
        assert_eq!(plan.vus_at(secs(5)), 10);
        assert_eq!(plan.vus_at(Duration::from_millis(7_500)), 5);
        assert_eq!(plan.vus_at(secs(10)), 0);
    }

    #[test]
    fn fluid_stages_share_remaining_time() {
        let stages = parse_stages(&["0-5", "5-0"], secs(60)).unwrap();
        assert_eq!(
            stages,
            vec![Stage::new(0, 5, secs(30)), Stage::new(5, 0, secs(30))]
        );

        let stages = parse_stages(&["0-5:20s", "5", "5-0"], secs(60)).unwrap();
        assert_eq!(stages[1].duration, secs(20));
        assert_eq!(stages[2].duration, secs(20));
    }

    #[test]
    fn fluid_stage_gets_nothing_when_budget_is_spent() {
        let stages = parse_stages(&["0-5:40s", "5-0", "0-1:30s"], secs(60)).unwrap();
        assert_eq!(stages[1].duration, Duration::ZERO);

        let stages = parse_stages(&["0-5:60s", "5-0"], secs(60)).unwrap();
        assert_eq!(stages[1].duration, Duration::ZERO);
    }

    #[test]
    fn missing_start_inherits_previous_end() {
        let stages = parse_stages(&["-20:10s", "-5:10s", ":5s"], secs(30)).unwrap();
        assert_eq!(stages[0], Stage::new(0, 20, secs(10)));
        assert_eq!(stages[1], Stage::new(20, 5, secs(10)));
        assert_eq!(stages[2], Stage::new(5, 5, secs(5)));
    }

    #[test]
    fn missing_end_keeps_level_flat() {
        let stages = parse_stages(&["7:1m"], secs(60)).unwrap();
        assert_eq!(stages, vec![Stage::new(7, 7, secs(60))]);
    }

    #[test]
    fn zero_length_stage_is_skipped_by_interpolation() {
        let plan = Plan::new(vec![
            Stage::new(0, 0, Duration::ZERO),
            Stage::new(4, 8, secs(4)),
        ]);
        assert_eq!(plan.vus_at(Duration::ZERO), 4);
        assert_eq!(plan.vus_at(secs(2)), 6);
        assert_eq!(plan.max_vus(), 8);
    }

    #[test]
    fn bad_count_is_rejected() {
        let err = parse_stages(&["ten-20:5s"], secs(5)).unwrap_err();
        assert!(matches!(err, Error::InvalidStage { .. }));
        assert!(parse_stages(&["1-x"], secs(5)).is_err());
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = parse_stages(&["1-2:forever"], secs(5)).unwrap_err();
        match err {
            Error::InvalidStage { spec, .. } => assert_eq!(spec, "1-2:forever"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_plan_targets_zero() {
        let plan = Plan::new(Vec::new());
        assert_eq!(plan.vus_at(secs(3)), 0);
        assert_eq!(plan.max_vus(), 0);
        assert_eq!(plan.total_duration(), Duration::ZERO);
    }

    #[test]
    fn plan_serializes_human_durations() {
        let plan = Plan::new(vec![Stage::new(0, 10, secs(90))]);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["stages"][0]["duration"], "1m 30s");
        assert_eq!(json["stages"][0]["end_vus"], 10);
    }
}
