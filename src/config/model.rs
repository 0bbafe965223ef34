// src/config/model.rs

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::commands::CommandSpec;
use crate::types::StateStorageMode;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// max_parallel_tasks = 4
///
/// [databases.dwh]
/// client = "psql -v ON_ERROR_STOP=on dwh"
///
/// [pipeline]
/// id = "etl"
/// description = "Nightly load"
///
/// [[pipeline.nodes]]
/// kind = "task"
/// id = "ping"
/// commands = [{ type = "shell", cmd = "ping -c 1 localhost" }]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Database clients from `[databases.<alias>]`.
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,

    /// The root pipeline.
    pub pipeline: PipelineSpec,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`) or
/// [`ConfigFile::new_unchecked`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub databases: BTreeMap<String, DatabaseConfig>,
    pub pipeline: PipelineSpec,
}

impl ConfigFile {
    /// Build a `ConfigFile` without running validation.
    pub fn new_unchecked(
        config: ConfigSection,
        databases: BTreeMap<String, DatabaseConfig>,
        pipeline: PipelineSpec,
    ) -> Self {
        Self {
            config,
            databases,
            pipeline,
        }
    }
}

/// `[config]` section. Passed explicitly into the coordinator at run start.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Global cap on concurrently running tasks.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,

    /// Retries for tasks that do not set `max_retries`.
    #[serde(default)]
    pub default_task_max_retries: u32,

    /// Shell used for `shell` commands; invoked as `<bash_command> -c <cmd>`.
    #[serde(default = "default_bash_command")]
    pub bash_command: String,

    /// Directory for run history and incremental state, relative to the
    /// config file directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub state_storage_mode: StateStorageMode,

    /// Database alias used by `sql` commands without `db_alias`.
    #[serde(default = "default_db_alias")]
    pub default_db_alias: String,

    /// Lower bound for date enumerations (`"YYYY-MM-DD"`).
    #[serde(default = "default_first_date")]
    pub first_date: NaiveDate,

    /// Upper bound for date enumerations (`"YYYY-MM-DD"`).
    #[serde(default = "default_last_date")]
    pub last_date: NaiveDate,

    /// Strings replaced by `***` in every `Output` event.
    #[serde(default)]
    pub password_masks: Vec<String>,

    /// Render console output without colors.
    #[serde(default)]
    pub disable_output_styling: bool,
}

fn default_max_parallel_tasks() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_bash_command() -> String {
    "/usr/bin/env bash -o pipefail".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".rundag")
}

fn default_db_alias() -> String {
    "dwh".to_string()
}

fn default_first_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

fn default_last_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(3000, 1, 1).unwrap_or_default()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            default_task_max_retries: 0,
            bash_command: default_bash_command(),
            state_dir: default_state_dir(),
            state_storage_mode: StateStorageMode::default(),
            default_db_alias: default_db_alias(),
            first_date: default_first_date(),
            last_date: default_last_date(),
            password_masks: Vec::new(),
            disable_output_styling: false,
        }
    }
}

/// `[databases.<alias>]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Shell command that executes SQL read from stdin.
    pub client: String,
}

/// A node of the pipeline tree, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeSpec {
    Pipeline(PipelineSpec),
    Task(TaskSpec),
}

impl NodeSpec {
    pub fn id(&self) -> &str {
        match self {
            NodeSpec::Pipeline(p) => &p.id,
            NodeSpec::Task(t) => &t.id,
        }
    }

    pub fn upstreams(&self) -> &[String] {
        match self {
            NodeSpec::Pipeline(p) => &p.upstreams,
            NodeSpec::Task(t) => &t.upstreams,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            NodeSpec::Pipeline(p) => &p.description,
            NodeSpec::Task(t) => &t.description,
        }
    }
}

/// A pipeline: a scheduling scope over its child nodes.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineSpec {
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Sibling ids this pipeline waits for.
    #[serde(default)]
    pub upstreams: Vec<String>,

    /// A failing child does not stop independent siblings.
    #[serde(default, alias = "ignore_errors")]
    pub continue_on_error: bool,

    /// Children run even when their upstreams failed.
    #[serde(default)]
    pub force_run_all_children: bool,

    /// At most this many direct child tasks run at the same time.
    #[serde(default)]
    pub max_parallel_tasks: Option<usize>,

    /// Directory for relative file names; inherited from the parent.
    #[serde(default)]
    pub base_path: Option<PathBuf>,

    /// Child that runs before every child without upstreams.
    #[serde(default)]
    pub initial_node: Option<String>,

    /// Child that runs after every child nothing else depends on.
    #[serde(default)]
    pub final_node: Option<String>,

    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl PipelineSpec {
    /// Sibling upstreams of every child, including the edges implied by
    /// `initial_node` and `final_node`.
    pub fn child_upstreams(&self) -> BTreeMap<String, Vec<String>> {
        let initial = self.initial_node.as_deref();
        let last = self.final_node.as_deref();
        let is_frame = |id: &str| Some(id) == initial || Some(id) == last;

        let mut upstreams: BTreeMap<String, Vec<String>> = self
            .nodes
            .iter()
            .map(|n| (n.id().to_string(), n.upstreams().to_vec()))
            .collect();

        if let Some(initial) = initial {
            for node in self.nodes.iter() {
                if node.upstreams().is_empty() && !is_frame(node.id()) {
                    if let Some(ups) = upstreams.get_mut(node.id()) {
                        ups.push(initial.to_string());
                    }
                }
            }
        }

        if let Some(last) = last {
            let has_downstream: HashSet<&str> = self
                .nodes
                .iter()
                .filter(|n| n.id() != last)
                .flat_map(|n| n.upstreams().iter().map(String::as_str))
                .collect();
            let sinks: Vec<String> = self
                .nodes
                .iter()
                .map(NodeSpec::id)
                .filter(|id| !is_frame(id) && !has_downstream.contains(id))
                .map(str::to_string)
                .collect();
            if let Some(ups) = upstreams.get_mut(last) {
                for sink in sinks {
                    if !ups.contains(&sink) {
                        ups.push(sink);
                    }
                }
                if let Some(initial) = initial {
                    if ups.is_empty() {
                        ups.push(initial.to_string());
                    }
                }
            }
        }

        upstreams
    }
}

/// A task: an ordered list of commands.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskSpec {
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Sibling ids this task waits for.
    #[serde(default)]
    pub upstreams: Vec<String>,

    /// Falls back to `[config].default_task_max_retries`.
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}
