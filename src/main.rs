//! CLI Entry Point for lc120_noise
//!
//! # Usage
//!
//! Start or continue a sweep:
//! ```bash
//! lc120_noise run --toml sweep.toml --scope USB0::0xF4EC::0xEE38::SDS1::INSTR --laser /dev/ttyUSB0
//! ```
//!
//! Dry run against simulated instruments:
//! ```bash
//! lc120_noise run --toml sweep.toml --mock
//! ```
//!
//! Inspect progress without touching hardware:
//! ```bash
//! lc120_noise status --toml sweep.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lc120_noise::hardware::{DeviceFactory, HardwareFactory, MockFactory};
use lc120_noise::logging::{self, parse_log_level, LoggingConfig, OutputFormat};
use lc120_noise::sweep::{run_sweep, status};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "lc120_noise")]
#[command(about = "Resumable laser current/temperature noise sweep", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, global = true, default_value = "info", value_parser = parse_log_level)]
    log_level: Level,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run or continue an interrupted one
    Run {
        /// Sweep configuration file
        #[arg(long)]
        toml: PathBuf,

        /// Oscilloscope VISA resource
        #[arg(long = "scope")]
        scope_resource: Option<String>,

        /// Laser controller serial port
        #[arg(long = "laser")]
        laser_port: Option<String>,

        /// Use simulated instruments
        #[arg(long)]
        mock: bool,
    },

    /// Report completed and pending points of a run
    Status {
        /// Sweep configuration file
        #[arg(long)]
        toml: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(LoggingConfig::new(cli.log_level).with_format(cli.log_format))
        .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            toml,
            scope_resource,
            laser_port,
            mock,
        } => {
            let factory: Box<dyn DeviceFactory> = if mock {
                Box::new(MockFactory::new())
            } else {
                Box::new(HardwareFactory::new(scope_resource, laser_port))
            };
            let outcome = run_sweep(&toml, factory.as_ref())
                .await
                .with_context(|| format!("sweep {} failed", toml.display()))?;
            println!(
                "{} of {} points acquired ({} already complete), {} traces written",
                outcome.acquired, outcome.total, outcome.skipped, outcome.traces_written
            );
            Ok(())
        }
        Commands::Status { toml } => {
            let report = status(&toml)?;
            if !report.exists {
                println!("{}: not started", report.run_path.display());
            }
            println!(
                "{}: {}/{} points complete, {} pending",
                report.run_path.display(),
                report.complete,
                report.total,
                report.pending
            );
            Ok(())
        }
    }
}
