//! Command-line interface for chartsup.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for chartsup.
#[derive(Parser)]
#[command(name = "chartsup", version, author)]
#[command(about = "Supervisor for a chart tile provider process", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for chartsup.
#[derive(Subcommand)]
pub enum Commands {
    /// Supervise the provider in the foreground until interrupted.
    Run {
        /// Path to the configuration file (defaults to `chartsup.yaml`, then `chartsup.yml`).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Resolve the configuration and print the provider command line without starting it.
    Check {
        /// Path to the configuration file (defaults to `chartsup.yaml`, then `chartsup.yml`).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Show the last status written by a running supervisor.
    Status {
        /// Path to the configuration file (defaults to `chartsup.yaml`, then `chartsup.yml`).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Query the running provider once and print its chart list as JSON.
    Charts {
        /// Path to the configuration file (defaults to `chartsup.yaml`, then `chartsup.yml`).
        #[arg(short, long)]
        config: Option<String>,

        /// Address substituted for loopback host names in the chart URLs.
        #[arg(long, value_name = "ADDR", default_value = "localhost")]
        host: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
