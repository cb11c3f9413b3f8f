mod commands;

use anyhow::Result;
use buildcheck_common::config::DEFAULT_CONFIG_PATH;
use buildcheck_common::types::Backend;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "buildcheck-cli")]
#[command(about = "buildcheck CLI - Scaffold, inspect and run build verification cases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new buildcheck project with a sample case
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// List backends with their build tool and availability on this host
    Backends {
        /// Harness config file
        #[arg(short, long, env = "BUILDCHECK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print the effective configuration
    ShowConfig {
        /// Harness config file
        #[arg(short, long, env = "BUILDCHECK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Run a single case file; exits 0 (passed), 1 (failed) or 2 (no result)
    Run {
        /// Path to a *.case.json file
        case: PathBuf,

        /// Backend to generate for (make, ninja, msvs, xcode)
        #[arg(short, long, env = "BUILDCHECK_FORMAT", default_value = "make")]
        format: Backend,

        /// Harness config file
        #[arg(short, long, env = "BUILDCHECK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Print the case report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable with --json
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            commands::init_project(&path)?;
        }
        Commands::Backends { config } => {
            commands::list_backends(&config)?;
        }
        Commands::ShowConfig { config } => {
            commands::show_config(&config)?;
        }
        Commands::Run {
            case,
            format,
            config,
            json,
        } => {
            let outcome = commands::run_case(&case, format, &config, json).await?;
            std::process::exit(outcome.exit_code());
        }
    }

    Ok(())
}
