//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// ralphd - spec-driven task orchestrator
#[derive(Parser)]
#[command(
    name = "rd",
    about = "Run a spec's task graph with bounded Ralph-Loop self-correction",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a spec's tasks to completion (exit 1 unless every required task completes)
    Run {
        /// Directory containing the task list
        #[arg(value_name = "SPEC_DIR")]
        spec_dir: PathBuf,

        /// Correction attempts per task before it is blocked
        #[arg(short, long)]
        max_attempts: Option<u32>,

        /// Never route commands through the gateway
        #[arg(long)]
        no_gateway: bool,

        /// Override the state directory
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Per-command timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show the persisted execution state
    Status {
        /// Spec directory whose state to show
        #[arg(value_name = "SPEC_DIR", default_value = ".")]
        spec_dir: PathBuf,

        /// Override the state directory
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Also print the correction activity log
        #[arg(long)]
        history: bool,
    },

    /// Start the gateway
    #[command(name = "gateway:start")]
    GatewayStart {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the gateway
    #[command(name = "gateway:stop")]
    GatewayStop,

    /// Check gateway status
    #[command(name = "gateway:status")]
    GatewayStatus {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Internal: run the gateway server (used by `gateway:start`)
    #[command(name = "gateway:serve", hide = true)]
    GatewayServe,
}

/// Output format for status commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

/// Path of the diagnostic log file
pub fn get_log_path() -> PathBuf {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralphd")
        .join("logs")
        .join("ralphd.log");
    debug!(?path, "get_log_path: returning path");
    path
}
