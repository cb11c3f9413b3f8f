use anyhow::{bail, Result};
use buildcheck_common::config::{HarnessConfig, DEFAULT_CONFIG_PATH};
use buildcheck_common::types::{Backend, Outcome, SuiteSummary};
use buildcheck_harness::suite::{discover_cases, run_suite};
use buildcheck_harness::ProcessEngine;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, instrument, warn};

#[derive(Parser)]
#[command(name = "buildcheck-runner")]
#[command(about = "Discover and run every *.case.json under the given directories", long_about = None)]
struct Args {
    /// Directories (or single case files) to run
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Backend to generate for (make, ninja, msvs, xcode)
    #[arg(short, long, env = "BUILDCHECK_FORMAT", default_value = "make")]
    format: Backend,

    /// Cases to run at once
    #[arg(short, long, env = "BUILDCHECK_JOBS", default_value = "4")]
    jobs: usize,

    /// Harness config file
    #[arg(short, long, env = "BUILDCHECK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load_or_default(path)?;
    let var = |name: &str| std::env::var(name).ok();
    config.preserve = config.preserve.with_overrides(
        var("PRESERVE").as_deref(),
        var("PRESERVE_PASS").as_deref(),
        var("PRESERVE_FAIL").as_deref(),
        var("PRESERVE_NO_RESULT").as_deref(),
    );
    Ok(config)
}

fn collect_cases(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut cases = Vec::new();
    for path in paths {
        if path.is_file() {
            cases.push(path.clone());
        } else if path.is_dir() {
            cases.extend(discover_cases(path)?);
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(cases)
}

#[instrument(skip(cases, config), fields(backend = %backend))]
async fn run_all(cases: Vec<PathBuf>, backend: Backend, config: HarnessConfig, jobs: usize) -> SuiteSummary {
    let runner = Arc::new(ProcessEngine::new(config.universal_newlines));
    run_suite(&cases, backend, &config, runner, jobs).await
}

fn print_summary(summary: &SuiteSummary) {
    for report in &summary.reports {
        let icon = match report.outcome {
            Outcome::Pass => "✅",
            Outcome::Fail => "❌",
            Outcome::NoResult => "⚠️ ",
        };
        let source = report
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| report.case_id.to_string());
        println!("{} {:<10} {} ({}ms)", icon, report.outcome.to_string(), source, report.duration_ms);
        if report.outcome == Outcome::Fail {
            if let Some(message) = &report.message {
                for line in message.lines() {
                    println!("      {}", line);
                }
            }
        }
        if let Some(workdir) = &report.workdir {
            println!("      → Preserved directory: {}", workdir.display());
        }
    }

    println!();
    println!(
        "📊 {} cases: {} passed, {} failed, {} no result",
        summary.total(),
        summary.passed,
        summary.failed,
        summary.no_result
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("buildcheck runner booting...");

    let config = load_config(&args.config).map_err(|e| {
        error!("Failed to load harness configuration: {}", e);
        e
    })?;
    let cases = collect_cases(&args.paths)?;
    if cases.is_empty() {
        warn!("No *.case.json files found");
        return Ok(());
    }

    info!(
        cases = cases.len(),
        backend = %args.format,
        jobs = args.jobs,
        "Discovered cases"
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, abandoning running cases...");
    };

    // Dropping the suite future kills in-flight children and removes their workspaces
    let summary = tokio::select! {
        summary = run_all(cases, args.format, config, args.jobs) => Some(summary),
        _ = shutdown => None,
    };

    let Some(summary) = summary else {
        info!("Runner shutdown complete");
        std::process::exit(Outcome::Fail.exit_code());
    };

    print_summary(&summary);
    std::process::exit(summary.exit_code());
}
