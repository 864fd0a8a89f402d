// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `haku`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "haku",
    version,
    about = "Run a pipeline of dependent tasks with bounded concurrency.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Haku.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Haku.toml")]
    pub config: String,

    /// Parse + validate, print the tasks in execution order, but don't run
    /// anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `HAKU_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Override `[engine].max_concurrency` from the config file.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["haku"]).unwrap();
        assert_eq!(args.config, "Haku.toml");
        assert!(!args.dry_run);
        assert_eq!(args.log_level, None);
        assert_eq!(args.max_concurrency, None);
    }

    #[test]
    fn all_flags() {
        let args = CliArgs::try_parse_from([
            "haku",
            "--config",
            "ci/Haku.toml",
            "--dry-run",
            "--log-level",
            "debug",
            "--max-concurrency",
            "8",
        ])
        .unwrap();
        assert_eq!(args.config, "ci/Haku.toml");
        assert!(args.dry_run);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert_eq!(args.max_concurrency, Some(8));
    }
}
