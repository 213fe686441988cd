//! File logging for the client binary.
//!
//! Everything goes to `<data dir>/logs/client.log` through a non-blocking
//! writer. Stdout stays free for command output.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,sshdeck_client=info";
const LOG_FILE: &str = "client.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub format: LogFormat,
    /// Explicit directive; falls back to `RUST_LOG`, then the built-in default
    pub filter: Option<String>,
    pub truncate: bool,
}

/// Keeps the background writer alive; drop it last.
pub struct LoggingHandle {
    pub run_id: String,
    pub log_path: PathBuf,
    _guard: WorkerGuard,
}

/// Pick the filter directive, skipping any that fail to parse.
fn resolve_filter(explicit: Option<&str>, from_env: Option<&str>) -> (EnvFilter, String) {
    [explicit, from_env]
        .into_iter()
        .flatten()
        .find_map(|directive| {
            EnvFilter::try_new(directive)
                .ok()
                .map(|filter| (filter, directive.to_string()))
        })
        .unwrap_or_else(|| (EnvFilter::new(DEFAULT_FILTER), DEFAULT_FILTER.to_string()))
}

fn run_id() -> String {
    std::env::var("SSHDECK_RUN_ID").unwrap_or_else(|_| {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("pid-{}-{}", std::process::id(), millis)
    })
}

fn open_log(dir: &Path, truncate: bool) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE);
    if truncate {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
    }
    Ok(path)
}

pub fn init_logging(settings: &LogSettings) -> anyhow::Result<LoggingHandle> {
    let log_path = open_log(&settings.dir, settings.truncate)?;
    let rust_log = std::env::var("RUST_LOG").ok();
    let (filter, directive) = resolve_filter(settings.filter.as_deref(), rust_log.as_deref());

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&settings.dir, LOG_FILE));

    let registry = tracing_subscriber::registry().with(filter);
    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    let run_id = run_id();
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = ?settings.format,
        filter = %directive,
        run_id = %run_id,
    );

    Ok(LoggingHandle {
        run_id,
        log_path,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_beats_env() {
        let (_, directive) = resolve_filter(Some("debug"), Some("warn"));
        assert_eq!(directive, "debug");
    }

    #[test]
    fn invalid_directive_falls_through() {
        let (_, directive) = resolve_filter(Some("sshdeck_client=loud"), Some("warn"));
        assert_eq!(directive, "warn");

        let (_, directive) = resolve_filter(None, None);
        assert_eq!(directive, DEFAULT_FILTER);
    }

    #[test]
    fn truncate_empties_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE);
        std::fs::write(&path, "old run\n").unwrap();

        open_log(dir.path(), false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old run\n");

        open_log(dir.path(), true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
