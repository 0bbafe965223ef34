// src/command/function.rs

//! User functions callable from `function` commands.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::command::{BoxFuture, Command, CommandContext, CommandOutcome};
use crate::config::commands::FunctionSpec;
use crate::errors::RundagError;
use crate::events::OutputSink;
use crate::incremental::IncrementalTracker;
use crate::types::NodePath;

/// Everything a registered function receives.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub node_path: NodePath,
    pub args: Vec<String>,
    pub output: OutputSink,
    pub tracker: IncrementalTracker,
}

/// A registered function; returns whether it succeeded.
///
/// Functions are blocking and run on Tokio's blocking pool.
pub type TaskFunction = Arc<dyn Fn(FunctionCall) -> Result<bool> + Send + Sync>;

/// Named functions available to `function` commands.
///
/// Unknown names are rejected when the graph is built.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, TaskFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(FunctionCall) -> Result<bool> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<TaskFunction> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// `function { function, args }`
#[derive(Clone)]
pub struct FunctionCommand {
    pub name: String,
    pub args: Vec<String>,
    function: TaskFunction,
}

impl fmt::Debug for FunctionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCommand")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl FunctionCommand {
    pub fn from_spec(
        spec: &FunctionSpec,
        registry: &FunctionRegistry,
    ) -> crate::errors::Result<Self> {
        let function = registry
            .get(&spec.function)
            .ok_or_else(|| RundagError::UnknownFunction(spec.function.clone()))?;
        Ok(Self {
            name: spec.function.clone(),
            args: spec.args.clone(),
            function,
        })
    }
}

impl Command for FunctionCommand {
    fn describe(&self) -> String {
        format!("{}({})", self.name, self.args.join(", "))
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            let call = FunctionCall {
                node_path: ctx.node_path().clone(),
                args: self.args.clone(),
                output: ctx.output().clone(),
                tracker: ctx.tracker().clone(),
            };
            let function = Arc::clone(&self.function);
            let succeeded = tokio::task::spawn_blocking(move || function(call))
                .await
                .map_err(|e| anyhow!("function '{}' panicked: {e}", self.name))??;
            Ok(if succeeded {
                CommandOutcome::Succeeded
            } else {
                CommandOutcome::Failed { exit_code: None }
            })
        })
    }
}
