// src/expand/mod.rs

//! Dynamic graph expansion.
//!
//! A task whose last command is a generator (`parallel_files`,
//! `parallel_values`, `parallel_dates`) is expanded right before it would
//! run: the generator enumerates its items and every item becomes a
//! generated task below the generating task.
//!
//! - [`ids`] derives deterministic, unique ids from item keys.
//! - [`template`] instantiates command templates for one item.
//! - [`sources`] enumerates items for each generator kind.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::command::{
    build_commands, Command, ExecutionEnv, FunctionRegistry, UpdateFileDependencies,
};
use crate::config::commands::GeneratorSpec;
use crate::types::NodePath;

pub mod ids;
pub mod sources;
pub mod template;

use ids::IdAllocator;
use sources::Item;

/// Id of the generated task running the commands before the generator.
pub const BEFORE_TASK_ID: &str = "before";
/// Id of the generated task running `commands_after`.
pub const AFTER_TASK_ID: &str = "after";

/// A generator could not enumerate its work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct LaunchError {
    pub message: String,
}

impl LaunchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Task produced by a generator.
#[derive(Debug, Clone)]
pub struct GeneratedTask {
    pub id: String,
    pub description: String,
    /// Ids of other generated tasks of the same batch.
    pub upstreams: Vec<String>,
    pub commands: Vec<Arc<dyn Command>>,
    pub max_retries: u32,
}

/// Everything needed to expand one generating task.
#[derive(Debug, Clone)]
pub struct ExpansionRequest {
    pub path: NodePath,
    pub generator: GeneratorSpec,
    /// Commands that precede the generator in the task.
    pub before: Vec<Arc<dyn Command>>,
    pub base_path: PathBuf,
    pub max_retries: u32,
}

/// Result of a successful expansion.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub tasks: Vec<GeneratedTask>,
    pub max_parallel_tasks: Option<usize>,
}

/// Runs generators against the execution environment.
#[derive(Debug, Clone)]
pub struct Expander {
    registry: FunctionRegistry,
    env: Arc<ExecutionEnv>,
}

impl Expander {
    pub fn new(registry: FunctionRegistry, env: Arc<ExecutionEnv>) -> Self {
        Self { registry, env }
    }

    pub async fn expand(&self, request: &ExpansionRequest) -> Result<Expansion, LaunchError> {
        info!(node = %request.path, "expanding generator");

        let enumeration = sources::enumerate(request, &self.env).await?;
        let items = enumeration.items;
        debug!(node = %request.path, items = items.len(), "generator enumerated items");

        let mut allocator = IdAllocator::new([BEFORE_TASK_ID, AFTER_TASK_ID]);
        let has_before = !request.before.is_empty();

        let mut tasks = Vec::new();
        if has_before {
            tasks.push(GeneratedTask {
                id: BEFORE_TASK_ID.to_string(),
                description: "Commands before the generated tasks".to_string(),
                upstreams: Vec::new(),
                commands: request.before.clone(),
                max_retries: request.max_retries,
            });
        }

        let mut item_ids = Vec::with_capacity(items.len());
        for Item { key, value, extra } in items {
            let id = allocator.allocate(&key);
            let specs = template::instantiate(
                request.generator.commands(),
                request.generator.placeholder(),
                &value,
            )?;
            let mut commands = build_commands(&specs, &self.registry)
                .map_err(|e| LaunchError::new(format!("building commands for '{key}': {e}")))?;
            commands.extend(extra);

            item_ids.push(id.clone());
            tasks.push(GeneratedTask {
                id,
                description: key,
                upstreams: if has_before {
                    vec![BEFORE_TASK_ID.to_string()]
                } else {
                    Vec::new()
                },
                commands,
                max_retries: request.max_retries,
            });
        }

        let mut after = build_commands(request.generator.commands_after(), &self.registry)
            .map_err(|e| LaunchError::new(format!("building commands_after: {e}")))?;
        if let Some((key, hash)) = enumeration.file_dependencies {
            after.push(Arc::new(UpdateFileDependencies {
                owner: request.path.clone(),
                key,
                hash,
            }));
        }
        if !after.is_empty() {
            let upstreams = if item_ids.is_empty() && has_before {
                vec![BEFORE_TASK_ID.to_string()]
            } else {
                item_ids.clone()
            };
            tasks.push(GeneratedTask {
                id: AFTER_TASK_ID.to_string(),
                description: "Commands after the generated tasks".to_string(),
                upstreams,
                commands: after,
                max_retries: request.max_retries,
            });
        }

        Ok(Expansion {
            tasks,
            max_parallel_tasks: request.generator.max_parallel_tasks(),
        })
    }
}
