// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::commands::CommandSpec;
use crate::config::model::{ConfigFile, NodeSpec, PipelineSpec, RawConfigFile, TaskSpec};
use crate::errors::{Result, RundagError};
use crate::types::NodePath;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RundagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.databases, raw.pipeline))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_global_config(cfg)?;
    validate_pipeline_tree(&cfg.pipeline)?;
    validate_sql_aliases(cfg, &cfg.pipeline, &NodePath::root())?;
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_parallel_tasks == 0 {
        return Err(RundagError::ConfigError(
            "[config].max_parallel_tasks must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.first_date > cfg.config.last_date {
        return Err(RundagError::ConfigError(format!(
            "[config].first_date ({}) is after last_date ({})",
            cfg.config.first_date, cfg.config.last_date
        )));
    }

    if cfg.config.bash_command.trim().is_empty() {
        return Err(RundagError::ConfigError(
            "[config].bash_command must not be empty".to_string(),
        ));
    }

    for (alias, db) in cfg.databases.iter() {
        if db.client.trim().is_empty() {
            return Err(RundagError::ConfigError(format!(
                "[databases.{alias}].client must not be empty"
            )));
        }
    }

    Ok(())
}

/// Structural validation of a pipeline tree.
///
/// Checks, recursively:
/// - every id matches `^[a-z0-9_]+$`,
/// - sibling ids are unique,
/// - `upstreams` only name siblings (never the node itself),
/// - the dependency graph of every pipeline is acyclic,
/// - generator commands only appear as the last command of a task, and
///   never inside another generator's templates.
pub fn validate_pipeline_tree(root: &PipelineSpec) -> Result<()> {
    validate_id(&root.id, &NodePath::root())?;

    if let Some(first) = root.upstreams.first() {
        return Err(RundagError::UnknownDependency(format!(
            "root pipeline '{}' cannot have upstreams (found '{}')",
            root.id, first
        )));
    }

    validate_pipeline(root, &NodePath::root())
}

/// Whether `id` is a valid node id.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn validate_id(id: &str, path: &NodePath) -> Result<()> {
    if !is_valid_id(id) {
        return Err(RundagError::InvalidId(format!(
            "'{id}' at '{path}' must only contain lowercase letters, digits and '_'"
        )));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineSpec, path: &NodePath) -> Result<()> {
    if pipeline.max_parallel_tasks == Some(0) {
        return Err(RundagError::ConfigError(format!(
            "pipeline '{path}' has max_parallel_tasks = 0"
        )));
    }

    let mut ids: HashSet<&str> = HashSet::new();
    for node in pipeline.nodes.iter() {
        let child_path = path.child(node.id());
        validate_id(node.id(), &child_path)?;
        if !ids.insert(node.id()) {
            return Err(RundagError::DuplicateNode(format!(
                "pipeline '{path}' contains '{}' more than once",
                node.id()
            )));
        }
    }

    for node in pipeline.nodes.iter() {
        for upstream in node.upstreams() {
            if upstream == node.id() {
                return Err(RundagError::UnknownDependency(format!(
                    "node '{}' cannot depend on itself",
                    path.child(node.id())
                )));
            }
            if !ids.contains(upstream.as_str()) {
                return Err(RundagError::UnknownDependency(format!(
                    "node '{}' depends on '{}', which is not a sibling in '{path}'",
                    path.child(node.id()),
                    upstream
                )));
            }
        }
    }

    validate_frame_nodes(pipeline, path, &ids)?;
    validate_acyclic(pipeline, path)?;

    for node in pipeline.nodes.iter() {
        let child_path = path.child(node.id());
        match node {
            NodeSpec::Pipeline(p) => validate_pipeline(p, &child_path)?,
            NodeSpec::Task(t) => validate_task(t, &child_path)?,
        }
    }

    Ok(())
}

/// `initial_node` must be a source and `final_node` a sink of the pipeline.
fn validate_frame_nodes(
    pipeline: &PipelineSpec,
    path: &NodePath,
    ids: &HashSet<&str>,
) -> Result<()> {
    let frames = [
        ("initial_node", pipeline.initial_node.as_deref()),
        ("final_node", pipeline.final_node.as_deref()),
    ];
    for (key, id) in frames {
        if let Some(id) = id {
            if !ids.contains(id) {
                return Err(RundagError::UnknownDependency(format!(
                    "{key} '{id}' is not a child of pipeline '{path}'"
                )));
            }
        }
    }

    if let (Some(initial), Some(last)) = (&pipeline.initial_node, &pipeline.final_node) {
        if initial == last {
            return Err(RundagError::ConfigError(format!(
                "pipeline '{path}' uses '{initial}' as both initial_node and final_node"
            )));
        }
    }

    for node in pipeline.nodes.iter() {
        if pipeline.initial_node.as_deref() == Some(node.id()) && !node.upstreams().is_empty() {
            return Err(RundagError::ConfigError(format!(
                "initial_node '{}' cannot have upstreams",
                path.child(node.id())
            )));
        }
        if let Some(last) = pipeline.final_node.as_deref() {
            if node.upstreams().iter().any(|u| u == last) {
                return Err(RundagError::ConfigError(format!(
                    "node '{}' cannot depend on final_node '{last}'",
                    path.child(node.id())
                )));
            }
        }
    }

    Ok(())
}

fn validate_acyclic(pipeline: &PipelineSpec, path: &NodePath) -> Result<()> {
    let upstreams = pipeline.child_upstreams();

    // Edge direction: upstream -> node.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for node in pipeline.nodes.iter() {
        graph.add_node(node.id());
    }

    for (id, ups) in upstreams.iter() {
        for upstream in ups {
            graph.add_edge(upstream.as_str(), id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(RundagError::DagCycle(format!(
            "cycle detected in pipeline '{path}' involving node '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_task(task: &TaskSpec, path: &NodePath) -> Result<()> {
    let last = task.commands.len().saturating_sub(1);
    for (idx, command) in task.commands.iter().enumerate() {
        if command.is_generator() && idx != last {
            return Err(RundagError::GeneratorPlacement(format!(
                "task '{path}': '{}' must be the last command",
                command.kind()
            )));
        }
        if let Some(generator) = command.as_generator() {
            let templates = generator
                .commands()
                .iter()
                .chain(generator.commands_after().iter());
            for template in templates {
                if template.is_generator() {
                    return Err(RundagError::GeneratorPlacement(format!(
                        "task '{path}': '{}' cannot be nested inside '{}'",
                        template.kind(),
                        command.kind()
                    )));
                }
            }
            if generator.max_parallel_tasks() == Some(0) {
                return Err(RundagError::ConfigError(format!(
                    "task '{path}': max_parallel_tasks must be >= 1"
                )));
            }
        }
        if let CommandSpec::Sql(sql) = command {
            if sql.sql_statement.is_some() == sql.sql_file_name.is_some() {
                return Err(RundagError::ConfigError(format!(
                    "task '{path}': sql needs exactly one of sql_statement or sql_file_name"
                )));
            }
        }
    }
    Ok(())
}

fn validate_sql_aliases(
    cfg: &RawConfigFile,
    pipeline: &PipelineSpec,
    path: &NodePath,
) -> Result<()> {
    for node in pipeline.nodes.iter() {
        let child_path = path.child(node.id());
        match node {
            NodeSpec::Pipeline(p) => validate_sql_aliases(cfg, p, &child_path)?,
            NodeSpec::Task(t) => {
                for command in all_commands(&t.commands) {
                    if let CommandSpec::Sql(sql) = command {
                        let alias = sql
                            .db_alias
                            .as_deref()
                            .unwrap_or(&cfg.config.default_db_alias);
                        if !cfg.databases.contains_key(alias) {
                            return Err(RundagError::ConfigError(format!(
                                "task '{child_path}' uses unknown database alias '{alias}'"
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// All commands of a task, including generator templates.
fn all_commands(commands: &[CommandSpec]) -> Vec<&CommandSpec> {
    let mut out = Vec::new();
    for command in commands {
        out.push(command);
        if let Some(generator) = command_templates(command) {
            out.extend(generator);
        }
    }
    out
}

fn command_templates(command: &CommandSpec) -> Option<impl Iterator<Item = &CommandSpec>> {
    let (commands, after) = match command {
        CommandSpec::ParallelFiles(s) => (&s.commands, &s.commands_after),
        CommandSpec::ParallelValues(s) => (&s.commands, &s.commands_after),
        CommandSpec::ParallelDates(s) => (&s.commands, &s.commands_after),
        _ => return None,
    };
    Some(commands.iter().chain(after.iter()))
}
