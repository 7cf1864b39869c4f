// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// Command-line arguments for `gradewatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gradewatch",
    version,
    about = "Periodically sync student repositories and re-grade them.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// A missing file is not an error: built-in defaults are used and a
    /// warning is logged.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Run a single sync + grade cycle, print the snapshot as JSON, and exit.
    #[arg(long)]
    pub once: bool,

    /// Grade this period instead of `[periods].current`.
    ///
    /// Must be one of `[periods].valid`.
    #[arg(long, value_name = "NAME")]
    pub period: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `GRADEWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate config, list discovered entities, but run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
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
