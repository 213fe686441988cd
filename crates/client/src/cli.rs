use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sshdeck_client::ClientConfig;

use crate::logging::{LogFormat, LogSettings};

#[derive(Parser, Debug)]
#[command(name = "sshdeck")]
#[command(version, about = "sshdeck client: drives the backend and restores the saved workspace")]
pub struct Cli {
    /// Backend executable to spawn
    #[arg(long, global = true, env = "SSHDECK_BACKEND", default_value = "sshdeck-backend")]
    pub backend: PathBuf,

    /// Extra argument for the backend (repeatable)
    #[arg(long = "backend-arg", global = true, allow_hyphen_values = true)]
    pub backend_args: Vec<String>,

    /// Data directory (defaults to SSHDECK_DATA_DIR, then ~/.sshdeck)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Quiet period before workspace changes are saved
    #[arg(long, global = true, default_value_t = 1000)]
    pub save_debounce_ms: u64,

    /// Timeout for connect-class calls
    #[arg(long, global = true, default_value_t = 30)]
    pub connect_timeout_secs: u64,

    /// Timeout for control calls
    #[arg(long, global = true, default_value_t = 5)]
    pub request_timeout_secs: u64,

    /// Log output format
    #[arg(long, global = true, env = "SSHDECK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Log filter directive (falls back to RUST_LOG)
    #[arg(long, global = true, env = "SSHDECK_LOG_FILTER")]
    pub log_filter: Option<String>,

    /// Start with an empty log file
    #[arg(long, global = true)]
    pub truncate_log: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Restore the workspace and keep it saved until Ctrl-C (default)
    Run {
        /// Name announced to the backend for this workspace
        #[arg(long, default_value = "default")]
        name: String,
    },

    /// Inspect or reset the saved workspace state
    State {
        #[command(subcommand)]
        action: StateCommand,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCommand {
    /// Print the saved workspace
    Show,
    /// Delete the saved workspace
    Clear,
}

impl Cli {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            save_debounce: Duration::from_millis(self.save_debounce_ms),
            ..ClientConfig::default()
        }
    }

    pub fn log_settings(&self, dir: PathBuf) -> LogSettings {
        LogSettings {
            dir,
            format: self.log_format,
            filter: self.log_filter.clone(),
            truncate: self.truncate_log,
        }
    }
}
