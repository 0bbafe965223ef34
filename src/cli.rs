// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `rundag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Run pipelines of shell, SQL and file tasks as a dependency graph.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Rundag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Rundag.toml", global = true)]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Run the root pipeline or a sub-pipeline.
    Run(RunArgs),
    /// Parse + validate, print the node tree, but don't execute anything.
    Check,
    /// Forget incremental state of every node below a path.
    ResetIncremental {
        /// Node path, e.g. `load/customers`. `/` resets everything.
        #[arg(long, value_name = "PATH")]
        path: String,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Run only the pipeline at this path (e.g. `load/customers`).
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Run only these children of the selected pipeline.
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Also run every upstream of `--nodes`.
    #[arg(long)]
    pub with_upstreams: bool,

    /// Plain console output without colors.
    #[arg(long)]
    pub disable_colors: bool,
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
