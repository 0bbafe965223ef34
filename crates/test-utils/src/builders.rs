#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use rundag::config::commands::{FunctionSpec, ParallelValuesSpec, ShellSpec};
use rundag::config::{
    CommandSpec, ConfigFile, ConfigSection, NodeSpec, PipelineSpec, RawConfigFile, TaskSpec,
};
use rundag::types::StateStorageMode;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Defaults to in-memory state so tests never touch the working directory.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(pipeline: PipelineSpec) -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection {
                    state_storage_mode: StateStorageMode::Memory,
                    ..ConfigSection::default()
                },
                databases: BTreeMap::new(),
                pipeline,
            },
        }
    }

    pub fn max_parallel_tasks(mut self, n: usize) -> Self {
        self.config.config.max_parallel_tasks = n;
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.config.state_dir = dir.into();
        self.config.config.state_storage_mode = StateStorageMode::File;
        self
    }

    pub fn password_mask(mut self, mask: &str) -> Self {
        self.config.config.password_masks.push(mask.to_string());
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `PipelineSpec`.
pub struct PipelineSpecBuilder {
    pipeline: PipelineSpec,
}

impl PipelineSpecBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            pipeline: PipelineSpec {
                id: id.to_string(),
                ..PipelineSpec::default()
            },
        }
    }

    pub fn upstream(mut self, dep: &str) -> Self {
        self.pipeline.upstreams.push(dep.to_string());
        self
    }

    pub fn continue_on_error(mut self, val: bool) -> Self {
        self.pipeline.continue_on_error = val;
        self
    }

    pub fn force_run_all_children(mut self, val: bool) -> Self {
        self.pipeline.force_run_all_children = val;
        self
    }

    pub fn max_parallel_tasks(mut self, n: usize) -> Self {
        self.pipeline.max_parallel_tasks = Some(n);
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline.base_path = Some(path.into());
        self
    }

    pub fn initial_node(mut self, id: &str) -> Self {
        self.pipeline.initial_node = Some(id.to_string());
        self
    }

    pub fn final_node(mut self, id: &str) -> Self {
        self.pipeline.final_node = Some(id.to_string());
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.pipeline.nodes.push(NodeSpec::Task(task));
        self
    }

    pub fn pipeline(mut self, pipeline: PipelineSpec) -> Self {
        self.pipeline.nodes.push(NodeSpec::Pipeline(pipeline));
        self
    }

    pub fn build(self) -> PipelineSpec {
        self.pipeline
    }
}

/// Builder for `TaskSpec`.
pub struct TaskSpecBuilder {
    task: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: TaskSpec {
                id: id.to_string(),
                ..TaskSpec::default()
            },
        }
    }

    pub fn upstream(mut self, dep: &str) -> Self {
        self.task.upstreams.push(dep.to_string());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = Some(n);
        self
    }

    pub fn shell(mut self, cmd: &str) -> Self {
        self.task.commands.push(CommandSpec::Shell(ShellSpec {
            cmd: cmd.to_string(),
            file_dependencies: Vec::new(),
        }));
        self
    }

    pub fn function(mut self, name: &str, args: &[&str]) -> Self {
        self.task.commands.push(CommandSpec::Function(FunctionSpec {
            function: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }));
        self
    }

    /// Append a `parallel_values` generator running `template` per value.
    pub fn parallel_values(mut self, values: &[&str], template: &str) -> Self {
        self.task.commands.push(CommandSpec::ParallelValues(ParallelValuesSpec {
            values: values.iter().map(|v| v.to_string()).collect(),
            values_command: None,
            commands: vec![CommandSpec::Shell(ShellSpec {
                cmd: template.to_string(),
                file_dependencies: Vec::new(),
            })],
            commands_after: Vec::new(),
            max_parallel_tasks: None,
        }));
        self
    }

    pub fn command(mut self, command: CommandSpec) -> Self {
        self.task.commands.push(command);
        self
    }

    pub fn build(self) -> TaskSpec {
        self.task
    }
}
