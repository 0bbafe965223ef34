// src/config/commands.rs

//! Serializable command specifications.
//!
//! These are the `commands = [...]` entries of a task. They are turned into
//! executable [`crate::command::Command`] objects when the graph is built.
//! Generator specs keep their nested command templates as `CommandSpec`s,
//! since those are only instantiated once the generator has enumerated its
//! items.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{Compression, ReadMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandSpec {
    Shell(ShellSpec),
    Sql(SqlSpec),
    ReadFile(ReadFileSpec),
    WriteFile(WriteFileSpec),
    Function(FunctionSpec),
    Incremental(IncrementalSpec),
    ParallelFiles(ParallelFilesSpec),
    ParallelValues(ParallelValuesSpec),
    ParallelDates(ParallelDatesSpec),
}

impl CommandSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandSpec::Shell(_) => "shell",
            CommandSpec::Sql(_) => "sql",
            CommandSpec::ReadFile(_) => "read_file",
            CommandSpec::WriteFile(_) => "write_file",
            CommandSpec::Function(_) => "function",
            CommandSpec::Incremental(_) => "incremental",
            CommandSpec::ParallelFiles(_) => "parallel_files",
            CommandSpec::ParallelValues(_) => "parallel_values",
            CommandSpec::ParallelDates(_) => "parallel_dates",
        }
    }

    pub fn is_generator(&self) -> bool {
        self.as_generator().is_some()
    }

    pub fn as_generator(&self) -> Option<GeneratorSpec> {
        match self {
            CommandSpec::ParallelFiles(s) => Some(GeneratorSpec::Files(s.clone())),
            CommandSpec::ParallelValues(s) => Some(GeneratorSpec::Values(s.clone())),
            CommandSpec::ParallelDates(s) => Some(GeneratorSpec::Dates(s.clone())),
            _ => None,
        }
    }
}

/// Run a shell command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellSpec {
    pub cmd: String,

    /// Files (relative to the pipeline `base_path`) whose contents decide
    /// whether the command needs to run at all.
    #[serde(default)]
    pub file_dependencies: Vec<String>,
}

/// Execute SQL through a database client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlSpec {
    #[serde(default)]
    pub sql_statement: Option<String>,

    #[serde(default)]
    pub sql_file_name: Option<String>,

    #[serde(default)]
    pub db_alias: Option<String>,

    /// Literal substitutions applied to the SQL text.
    #[serde(default)]
    pub replace: BTreeMap<String, String>,

    #[serde(default)]
    pub file_dependencies: Vec<String>,

    /// Log the SQL text before executing it.
    #[serde(default = "default_true")]
    pub echo_queries: bool,
}

/// Stream a (possibly compressed) file into a consumer command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadFileSpec {
    pub file_name: String,

    #[serde(default)]
    pub compression: Compression,

    pub consumer: String,
}

/// Write the stdout of a producer command into a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteFileSpec {
    pub command: String,
    pub file_name: String,
}

/// Call a function from the function registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub function: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Load only what changed since the last successful run.
///
/// `max_value_command` prints the current maximum of the comparison column.
/// When no value was stored yet `full_command` runs, otherwise
/// `incremental_command` runs with `{last_value}` substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalSpec {
    pub key: String,
    pub max_value_command: String,
    pub full_command: String,
    pub incremental_command: String,
}

/// One task per file matching `file_pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelFilesSpec {
    /// Glob relative to the pipeline `base_path`.
    pub file_pattern: String,

    #[serde(default)]
    pub read_mode: ReadMode,

    /// Regex with year, month and day capture groups; files dated before
    /// `[config].first_date` are ignored and files sort by date.
    #[serde(default)]
    pub date_regex: Option<String>,

    /// Files whose change forces all matching files to be re-read.
    #[serde(default)]
    pub file_dependencies: Vec<String>,

    /// Command templates, `{file}` is substituted.
    pub commands: Vec<CommandSpec>,

    #[serde(default)]
    pub commands_after: Vec<CommandSpec>,

    #[serde(default)]
    pub max_parallel_tasks: Option<usize>,
}

/// One task per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelValuesSpec {
    #[serde(default)]
    pub values: Vec<String>,

    /// Shell command whose non-empty stdout lines are the values.
    #[serde(default)]
    pub values_command: Option<String>,

    /// Command templates, `{value}` is substituted.
    pub commands: Vec<CommandSpec>,

    #[serde(default)]
    pub commands_after: Vec<CommandSpec>,

    #[serde(default)]
    pub max_parallel_tasks: Option<usize>,
}

/// One task per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelDatesSpec {
    #[serde(default)]
    pub start: Option<NaiveDate>,

    #[serde(default)]
    pub end: Option<NaiveDate>,

    /// Command templates, `{date}` is substituted.
    pub commands: Vec<CommandSpec>,

    #[serde(default)]
    pub commands_after: Vec<CommandSpec>,

    #[serde(default)]
    pub max_parallel_tasks: Option<usize>,
}

/// The generator variants of [`CommandSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorSpec {
    Files(ParallelFilesSpec),
    Values(ParallelValuesSpec),
    Dates(ParallelDatesSpec),
}

impl GeneratorSpec {
    pub fn commands(&self) -> &[CommandSpec] {
        match self {
            GeneratorSpec::Files(s) => &s.commands,
            GeneratorSpec::Values(s) => &s.commands,
            GeneratorSpec::Dates(s) => &s.commands,
        }
    }

    pub fn commands_after(&self) -> &[CommandSpec] {
        match self {
            GeneratorSpec::Files(s) => &s.commands_after,
            GeneratorSpec::Values(s) => &s.commands_after,
            GeneratorSpec::Dates(s) => &s.commands_after,
        }
    }

    pub fn max_parallel_tasks(&self) -> Option<usize> {
        match self {
            GeneratorSpec::Files(s) => s.max_parallel_tasks,
            GeneratorSpec::Values(s) => s.max_parallel_tasks,
            GeneratorSpec::Dates(s) => s.max_parallel_tasks,
        }
    }

    /// Placeholder substituted in the command templates.
    pub fn placeholder(&self) -> &'static str {
        match self {
            GeneratorSpec::Files(_) => "{file}",
            GeneratorSpec::Values(_) => "{value}",
            GeneratorSpec::Dates(_) => "{date}",
        }
    }
}

fn default_true() -> bool {
    true
}
