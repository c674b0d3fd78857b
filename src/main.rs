use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use rampload::cli::{Cli, Command, RunArgs};
use rampload::engine::Engine;
use rampload::redis_runner::RedisRunner;
use rampload::stats::{Accumulator, Registry};
use rampload::{server, Error, Result};

/// Exit status when any threshold failed during the run.
const EXIT_THRESHOLDS_FAILED: i32 = 99;
const EXIT_SETUP_FAILED: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Run(args) => match run(args).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %e, "run aborted");
                EXIT_SETUP_FAILED
            }
        },
    };
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: RunArgs) -> Result<i32> {
    // ── 1. Resolve everything that can fail before a VU exists ──
    let config = args.run_config()?;
    if args.plan {
        println!("{}", serde_json::to_string_pretty(&config.plan)?);
        return Ok(0);
    }
    let thresholds = args.threshold_set()?;
    let outputs = args.outputs()?;
    let target = args
        .target
        .clone()
        .ok_or(Error::MissingTarget)?;

    // ── 2. Sample pipeline ──────────────────────────────────────
    let accumulator = Arc::new(Accumulator::new(args.filter(), args.group_by.clone()));
    let mut builder = Registry::builder()
        .extra_tags(args.extra_tags())
        .backend(accumulator.clone());
    for output in outputs {
        builder = builder.backend(output);
    }
    let registry = Arc::new(builder.build());

    // ── 3. Runner + engine ──────────────────────────────────────
    let runner = Arc::new(RedisRunner::new(&target, registry.clone(), args.read_pct)?);
    let engine = Engine::new(runner, registry, accumulator, thresholds);

    if let Some(addr) = args.listen {
        let state = engine.state();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, state).await {
                tracing::error!(error = %e, "status API stopped");
            }
        });
    }

    // ── 4. Run ──────────────────────────────────────────────────
    let report = engine.run(config, CancellationToken::new()).await?;
    if args.prints_summary() {
        report.summary.print()?;
    }

    for failed in report.summary.failed_thresholds() {
        tracing::warn!(metric = %failed.metric, threshold = %failed.source, "threshold failed");
    }
    Ok(if report.thresholds_failed {
        EXIT_THRESHOLDS_FAILED
    } else {
        0
    })
}
