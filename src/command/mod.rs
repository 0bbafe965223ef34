// src/command/mod.rs

//! Executable commands.
//!
//! A task is an ordered list of [`Command`]s. Each command runs inside a
//! [`CommandContext`] that gives it the node path, the pipeline base path,
//! an output sink and the shared execution environment (settings,
//! incremental tracker, filesystem).
//!
//! - [`shell`] runs OS processes and streams their output.
//! - [`builtin`] holds the shell / sql / file / incremental commands.
//! - [`function`] holds the function registry and the function command.
//! - [`internal`] holds the bookkeeping commands added by generators.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::commands::CommandSpec;
use crate::config::{ConfigSection, DatabaseConfig};
use crate::errors::{Result, RundagError};
use crate::events::{EventPublisher, OutputSink};
use crate::fs::FileSystem;
use crate::incremental::IncrementalTracker;
use crate::types::NodePath;

pub mod builtin;
pub mod function;
pub mod internal;
pub mod shell;

pub use builtin::{
    IncrementalCommand, ReadFileCommand, ShellCommand, SqlCommand, SqlSource, WriteFileCommand,
};
pub use function::{FunctionCall, FunctionCommand, FunctionRegistry, TaskFunction};
pub use internal::{TrackProcessedFile, UpdateFileDependencies};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal result of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed { exit_code: Option<i32> },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded)
    }
}

/// A unit of work inside a task.
///
/// `Err` means the command could not run at all (spawn failure, unreadable
/// file); the task reports it and counts it as a failed attempt.
pub trait Command: fmt::Debug + Send + Sync {
    /// Short human readable form, shown before the command runs.
    fn describe(&self) -> String;

    fn execute<'a>(
        &'a self,
        ctx: &'a CommandContext,
    ) -> BoxFuture<'a, anyhow::Result<CommandOutcome>>;
}

/// Settings commands need from `[config]` and `[databases]`.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub bash_command: String,
    pub databases: BTreeMap<String, DatabaseConfig>,
    pub default_db_alias: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

impl ExecSettings {
    pub fn from_config(
        config: &ConfigSection,
        databases: &BTreeMap<String, DatabaseConfig>,
    ) -> Self {
        Self {
            bash_command: config.bash_command.clone(),
            databases: databases.clone(),
            default_db_alias: config.default_db_alias.clone(),
            first_date: config.first_date,
            last_date: config.last_date,
        }
    }
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self::from_config(&ConfigSection::default(), &BTreeMap::new())
    }
}

/// Process-wide execution environment shared by all running tasks.
#[derive(Debug, Clone)]
pub struct ExecutionEnv {
    pub settings: ExecSettings,
    pub tracker: IncrementalTracker,
    pub fs: Arc<dyn FileSystem>,
    pub publisher: EventPublisher,
}

/// Per-node view of the execution environment.
#[derive(Debug, Clone)]
pub struct CommandContext {
    env: Arc<ExecutionEnv>,
    node_path: NodePath,
    base_path: PathBuf,
    output: OutputSink,
}

impl CommandContext {
    pub fn new(env: Arc<ExecutionEnv>, node_path: NodePath, base_path: PathBuf) -> Self {
        let output = env.publisher.output_sink(&node_path);
        Self {
            env,
            node_path,
            base_path,
            output,
        }
    }

    pub fn env(&self) -> &Arc<ExecutionEnv> {
        &self.env
    }

    pub fn settings(&self) -> &ExecSettings {
        &self.env.settings
    }

    pub fn tracker(&self) -> &IncrementalTracker {
        &self.env.tracker
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.env.fs.as_ref()
    }

    pub fn node_path(&self) -> &NodePath {
        &self.node_path
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    /// Resolve a file name relative to the base path.
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.base_path.join(file_name)
    }
}

/// Turn a non-generator command spec into an executable command.
pub fn build_command(spec: &CommandSpec, registry: &FunctionRegistry) -> Result<Arc<dyn Command>> {
    let command: Arc<dyn Command> = match spec {
        CommandSpec::Shell(s) => Arc::new(ShellCommand::from_spec(s)),
        CommandSpec::Sql(s) => Arc::new(SqlCommand::from_spec(s)?),
        CommandSpec::ReadFile(s) => Arc::new(ReadFileCommand::from_spec(s)),
        CommandSpec::WriteFile(s) => Arc::new(WriteFileCommand::from_spec(s)),
        CommandSpec::Function(s) => Arc::new(FunctionCommand::from_spec(s, registry)?),
        CommandSpec::Incremental(s) => Arc::new(IncrementalCommand::from_spec(s)),
        CommandSpec::ParallelFiles(_)
        | CommandSpec::ParallelValues(_)
        | CommandSpec::ParallelDates(_) => {
            return Err(RundagError::GeneratorPlacement(format!(
                "'{}' can only be used as the last command of a task",
                spec.kind()
            )));
        }
    };
    Ok(command)
}

/// Build every command of a list.
pub fn build_commands(
    specs: &[CommandSpec],
    registry: &FunctionRegistry,
) -> Result<Vec<Arc<dyn Command>>> {
    specs.iter().map(|s| build_command(s, registry)).collect()
}
