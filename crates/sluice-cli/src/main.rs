//! `sluice`: inspect, probe and monitor the database pools of a service.
//!
//! All commands read the same environment variables as the service itself
//! (`NODE_ENV`, `DATABASE_HOST`, ..., `DATABASE_READ_REPLICA_URL`).

mod logging;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sluice_config::{ConnectionInputs, PoolConfiguration};
use sluice_pool::MonitorConfig;
use sluice_postgres::{Database, shutdown_signal};

use crate::logging::LogFormat;

#[derive(Parser)]
#[command(name = "sluice", version, about = "PostgreSQL pool toolkit")]
struct Cli {
    /// Override `NODE_ENV`
    #[arg(long, global = true)]
    env: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "SLUICE_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved pool configuration as JSON (secrets masked)
    Config,
    /// Print the ORM connection string
    ConnectionString {
        /// Build it for the read replica instead of the primary
        #[arg(long)]
        replica: bool,
    },
    /// Probe the primary pool once; exits non-zero when unhealthy
    Check,
    /// Keep the pools open and log their metrics until SIGINT/SIGTERM
    Run {
        /// Seconds between metric samples
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
        /// Warn above this utilization percentage
        #[arg(long, default_value_t = 80.0)]
        utilization_warn: f64,
        /// Warn above this many waiting requests
        #[arg(long, default_value_t = 10)]
        waiting_warn: u32,
    },
}

fn inputs(cli: &Cli) -> ConnectionInputs {
    let mut inputs = ConnectionInputs::from_env();
    if let Some(env) = &cli.env {
        inputs.environment = Some(env.clone());
    }
    inputs
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_format);
    let inputs = inputs(&cli);

    match cli.command {
        Command::Config => {
            let config = PoolConfiguration::resolve(&inputs);
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::ConnectionString { replica } => {
            let config = PoolConfiguration::resolve(&inputs);
            let config = if replica {
                let url = inputs
                    .read_replica_url
                    .as_deref()
                    .context("DATABASE_READ_REPLICA_URL is not set")?;
                config.for_replica(url)
            } else {
                config
            };
            println!("{}", config.connection_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let db = Database::from_inputs(&inputs).context("failed to create database pools")?;
            let health = db.check_health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            db.shutdown().await.context("failed to close database pools")?;

            Ok(if health.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Run {
            interval_secs,
            utilization_warn,
            waiting_warn,
        } => {
            let mut db =
                Database::from_inputs(&inputs).context("failed to create database pools")?;
            db.start_monitoring(
                MonitorConfig::default()
                    .interval(Duration::from_secs(interval_secs))
                    .utilization_warn_percent(utilization_warn)
                    .waiting_warn(waiting_warn),
            );

            let health = db.check_health().await;
            if !health.healthy {
                tracing::warn!(
                    error = health.error.as_deref().unwrap_or_default(),
                    "database not reachable at startup"
                );
            }

            shutdown_signal().await;
            db.shutdown().await.context("failed to close database pools")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "sluice",
            "--env",
            "staging",
            "run",
            "--interval-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.env.as_deref(), Some("staging"));
        assert!(matches!(
            cli.command,
            Command::Run {
                interval_secs: 5,
                waiting_warn: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_connection_string() {
        let cli = Cli::try_parse_from(["sluice", "connection-string", "--replica"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::ConnectionString { replica: true }
        ));
        assert_eq!(cli.log_format, LogFormat::Text);
    }
}
