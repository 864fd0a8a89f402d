// src/logging.rs

//! Logging setup for `haku` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `HAKU_LOG` environment variable: a level ("info", "debug") or a full
//!    filter directive ("haku=debug,warn")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout only carries the run report.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "HAKU_LOG";

/// Initialise global logging subscriber.
///
/// Call once at startup; a second call returns an error.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let builder = fmt()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    let env = std::env::var(LOG_ENV).ok();
    let result = match (cli_level, env) {
        (Some(lvl), _) => builder.with_max_level(level_from_log_level(lvl)).try_init(),
        (None, Some(value)) => match parse_level_str(&value) {
            Some(level) => builder.with_max_level(level).try_init(),
            None => match EnvFilter::try_new(value.trim()) {
                Ok(filter) => builder.with_env_filter(filter).try_init(),
                Err(_) => builder.with_max_level(tracing::Level::INFO).try_init(),
            },
        },
        (None, None) => builder.with_max_level(tracing::Level::INFO).try_init(),
    };

    result.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level_str(" DEBUG "), Some(tracing::Level::DEBUG));
        assert_eq!(parse_level_str("warning"), Some(tracing::Level::WARN));
        assert_eq!(parse_level_str("haku=debug"), None);
    }
}
