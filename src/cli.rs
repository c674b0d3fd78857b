use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::RunConfig;
use crate::error::Result;
use crate::plan::{parse_stages, Plan};
use crate::stats::writer::JsonLinesBackend;
use crate::stats::{parse_tags, Backend, Filter};
use crate::threshold::ThresholdSet;

#[derive(Parser, Debug)]
#[command(name = "rampload")]
#[command(about = "Stage-driven load generator with threshold checks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a load test against a target
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Run a single iteration on a single VU, then exit
    #[arg(long)]
    pub once: bool,

    /// Ramp stages, `[start][-end][:duration]`, comma separated
    #[arg(short = 'u', long = "vus")]
    pub vus: Vec<String>,

    /// Total test duration; fluid stages share what fixed stages leave
    #[arg(short, long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Don't print the final summary
    #[arg(short, long)]
    pub quiet: bool,

    /// Print a summary this often while running
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Sample outputs: `json`, `jsonl`, `stdout`, or `json=<path>`
    #[arg(short, long)]
    pub out: Vec<String>,

    /// Dump raw samples to stdout instead of a summary
    #[arg(long)]
    pub raw: bool,

    /// Only aggregate and output these metrics
    #[arg(short, long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Never aggregate or output these metrics
    #[arg(short, long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Partition metrics by these tags
    #[arg(short, long, value_delimiter = ',')]
    pub group_by: Vec<String>,

    /// Extra tag added to every sample: `key=value`, `key:value` or `value`
    #[arg(long)]
    pub tag: Vec<String>,

    /// Threshold for a metric, `metric=expression`
    #[arg(long = "threshold", value_parser = parse_threshold_flag)]
    pub threshold: Vec<(String, String)>,

    /// JSON file mapping metric names to lists of threshold expressions
    #[arg(long)]
    pub thresholds: Option<PathBuf>,

    /// Print the resolved stage plan as JSON and exit
    #[arg(long)]
    pub plan: bool,

    /// Serve the live status API on this address
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Share of Redis operations that are reads, in percent
    #[arg(long, default_value_t = 70, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub read_pct: u8,

    /// Target to load, e.g. `redis://127.0.0.1:6379/0`
    #[arg(env = "RAMPLOAD_TARGET", required_unless_present = "plan")]
    pub target: Option<String>,
}

fn parse_threshold_flag(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((metric, expr)) if !metric.trim().is_empty() && !expr.trim().is_empty() => {
            Ok((metric.trim().to_string(), expr.to_string()))
        }
        _ => Err(format!("expected `metric=expression`, got `{raw}`")),
    }
}

impl RunArgs {
    pub fn resolve_plan(&self) -> Result<Plan> {
        if self.once {
            return Ok(RunConfig::once().plan);
        }
        Ok(Plan::new(parse_stages(&self.vus, self.duration)?))
    }

    pub fn run_config(&self) -> Result<RunConfig> {
        if self.once {
            return Ok(RunConfig::once());
        }
        let mut config = RunConfig::new(self.resolve_plan()?);
        // raw mode owns stdout
        config.summary_interval = self.interval.filter(|_| !self.raw);
        config.handle_signals = true;
        Ok(config)
    }

    pub fn filter(&self) -> Filter {
        Filter::new(&self.exclude, &self.select)
    }

    /// Thresholds from `--thresholds` first, then each `--threshold` in order.
    pub fn threshold_set(&self) -> Result<ThresholdSet> {
        let mut set = match &self.thresholds {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => ThresholdSet::new(),
        };
        for (metric, expr) in &self.threshold {
            set.extend(metric, std::slice::from_ref(expr))?;
        }
        Ok(set)
    }

    /// Writer backends for `--out` and `--raw`.
    pub fn outputs(&self) -> Result<Vec<Arc<dyn Backend>>> {
        let mut outputs: Vec<Arc<dyn Backend>> = Vec::new();
        if self.raw {
            outputs.push(Arc::new(JsonLinesBackend::stdout(self.filter())));
        }
        for selector in &self.out {
            outputs.push(Arc::new(JsonLinesBackend::from_selector(selector, self.filter())?));
        }
        Ok(outputs)
    }

    pub fn extra_tags(&self) -> crate::stats::Tags {
        parse_tags(&self.tag)
    }

    /// Whether the end-of-run summary goes to stdout.
    pub fn prints_summary(&self) -> bool {
        !self.quiet && !self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::plan::Stage;
    use clap::error::ErrorKind;

    fn run_args(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(["rampload", "run"].iter().chain(args)).unwrap();
        match cli.command {
            Command::Run(args) => args,
        }
    }

    #[test]
    fn defaults() {
        let args = run_args(&["redis://localhost/"]);
        assert_eq!(args.duration, Duration::from_secs(10));
        assert_eq!(args.read_pct, 70);
        assert_eq!(args.target.as_deref(), Some("redis://localhost/"));
        assert!(args.prints_summary());

        let plan = args.resolve_plan().unwrap();
        assert_eq!(plan.stages, vec![Stage::new(10, 10, Duration::from_secs(10))]);
    }

    #[test]
    fn stages_and_duration() {
        let args = run_args(&["-u", "0-5", "-u", "5-0", "-d", "1m", "--plan"]);
        let plan = args.resolve_plan().unwrap();
        assert_eq!(
            plan.stages,
            vec![
                Stage::new(0, 5, Duration::from_secs(30)),
                Stage::new(5, 0, Duration::from_secs(30)),
            ]
        );
    }

    #[test]
    fn once_ignores_stages() {
        let args = run_args(&["--once", "-u", "0-50:1m", "redis://x/"]);
        let config = args.run_config().unwrap();
        assert!(config.once);
        assert_eq!(config.plan.stages, vec![Stage::once()]);
    }

    #[test]
    fn bad_stage_is_a_setup_error() {
        let args = run_args(&["-u", "ten-20:5s", "redis://x/"]);
        assert!(matches!(args.resolve_plan(), Err(Error::InvalidStage { .. })));
    }

    #[test]
    fn too_many_targets_is_rejected() {
        let err = Cli::try_parse_from(["rampload", "run", "redis://a/", "redis://b/"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn target_is_required_without_plan() {
        let err = Cli::try_parse_from(["rampload", "run"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn threshold_flags_append_to_file() {
        let path = std::env::temp_dir().join(format!("rampload-th-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"iteration_duration": ["p(95) < 500"]}"#).unwrap();

        let file = path.display().to_string();
        let args = run_args(&[
            "--thresholds",
            &file,
            "--threshold",
            "iteration_duration=max < 2000",
            "--threshold",
            "iterations=count > 0",
            "redis://x/",
        ]);
        let set = args.threshold_set().unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(
            set.get("iteration_duration").unwrap().sources().collect::<Vec<_>>(),
            vec!["p(95) < 500", "max < 2000"]
        );
        assert_eq!(set.get("iterations").unwrap().len(), 1);
    }

    #[test]
    fn malformed_threshold_flag() {
        let err = Cli::try_parse_from(["rampload", "run", "--threshold", "p(95) < 1", "redis://x/"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let args = run_args(&["--threshold", "iterations=count >", "redis://x/"]);
        assert!(matches!(args.threshold_set(), Err(Error::InvalidThreshold { index: 0, .. })));
    }

    #[test]
    fn outputs_and_filters() {
        let args = run_args(&[
            "--raw",
            "-o",
            "json",
            "-s",
            "iterations,vus",
            "-e",
            "vus",
            "redis://x/",
        ]);
        assert_eq!(args.outputs().unwrap().len(), 2);
        assert!(!args.prints_summary());

        let filter = args.filter();
        assert!(filter.allows("iterations"));
        assert!(!filter.allows("vus"));
        assert!(!filter.allows("redis_reqs"));

        let args = run_args(&["-o", "influxdb", "redis://x/"]);
        assert!(matches!(args.outputs(), Err(Error::UnknownOutput(_))));
    }

    #[test]
    fn raw_output_suppresses_interval_summaries() {
        let args = run_args(&["-i", "5s", "redis://x/"]);
        assert_eq!(args.run_config().unwrap().summary_interval, Some(Duration::from_secs(5)));

        let args = run_args(&["-i", "5s", "--raw", "redis://x/"]);
        assert_eq!(args.run_config().unwrap().summary_interval, None);
    }

    #[test]
    fn tags() {
        let args = run_args(&["--tag", "env=staging", "--tag", "canary", "redis://x/"]);
        let tags = args.extra_tags();
        assert_eq!(tags["env"], "staging");
        assert_eq!(tags["canary"], "canary");
    }
}
