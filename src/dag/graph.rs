// src/dag/graph.rs

//! Arena of pipeline and task nodes addressed by [`NodePath`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::{build_commands, Command, FunctionRegistry};
use crate::config::commands::GeneratorSpec;
use crate::config::model::{NodeSpec, PipelineSpec, TaskSpec};
use crate::config::validate::{is_valid_id, validate_pipeline_tree};
use crate::errors::{Result, RundagError};
use crate::expand::GeneratedTask;
use crate::types::NodePath;

/// Inputs for [`Graph::build`] that do not come from the node tree itself.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub registry: FunctionRegistry,
    /// Retries for tasks without `max_retries`.
    pub default_max_retries: u32,
    /// Base path of the root pipeline when it does not set one.
    pub base_path: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            registry: FunctionRegistry::new(),
            default_max_retries: 0,
            base_path: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineNode {
    /// Child ids in declaration order.
    pub children: Vec<String>,
    pub continue_on_error: bool,
    pub force_run_all_children: bool,
    pub max_parallel_tasks: Option<usize>,
    /// Framing children; their edges are already part of `upstreams`.
    pub initial_node: Option<String>,
    pub final_node: Option<String>,
}

impl PipelineNode {
    pub fn frame_nodes(&self) -> impl Iterator<Item = &String> {
        self.initial_node.iter().chain(self.final_node.iter())
    }
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Commands to run; for a generating task these are the commands that
    /// precede the generator.
    pub commands: Vec<Arc<dyn Command>>,
    pub generator: Option<GeneratorSpec>,
    pub max_retries: u32,
    /// Ids of generated children, once expanded.
    pub children: Vec<String>,
    pub expanded: bool,
    /// Cap on concurrently running generated children.
    pub max_parallel_tasks: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Pipeline(PipelineNode),
    Task(TaskNode),
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub path: NodePath,
    pub description: String,
    /// Sibling ids this node waits for.
    pub upstreams: Vec<String>,
    pub base_path: PathBuf,
    pub kind: NodeKind,
    /// Inserted by a generator at run time.
    pub generated: bool,
}

impl GraphNode {
    pub fn is_pipeline(&self) -> bool {
        matches!(self.kind, NodeKind::Pipeline(_))
    }

    pub fn as_pipeline(&self) -> Option<&PipelineNode> {
        match &self.kind {
            NodeKind::Pipeline(p) => Some(p),
            NodeKind::Task(_) => None,
        }
    }

    pub fn as_task(&self) -> Option<&TaskNode> {
        match &self.kind {
            NodeKind::Task(t) => Some(t),
            NodeKind::Pipeline(_) => None,
        }
    }

    /// Child ids (pipeline children or generated tasks).
    pub fn child_ids(&self) -> &[String] {
        match &self.kind {
            NodeKind::Pipeline(p) => &p.children,
            NodeKind::Task(t) => &t.children,
        }
    }
}

/// The node tree plus sibling dependency edges.
///
/// Read-only once built, except for [`Graph::insert_generated`], which
/// appends children below a generating task before any of them is scheduled.
#[derive(Debug, Clone)]
pub struct Graph {
    root_id: String,
    nodes: HashMap<NodePath, GraphNode>,
}

impl Graph {
    /// Validate `root` and build the arena.
    pub fn build(root: &PipelineSpec, options: &BuildOptions) -> Result<Self> {
        validate_pipeline_tree(root)?;

        let mut graph = Graph {
            root_id: root.id.clone(),
            nodes: HashMap::new(),
        };
        let base = root
            .base_path
            .clone()
            .unwrap_or_else(|| options.base_path.clone());
        graph.insert_pipeline(NodePath::root(), root, &base, options)?;
        Ok(graph)
    }

    fn insert_pipeline(
        &mut self,
        path: NodePath,
        spec: &PipelineSpec,
        base_path: &Path,
        options: &BuildOptions,
    ) -> Result<()> {
        let base_path = match &spec.base_path {
            Some(own) if !path.is_root() => base_path.join(own),
            _ => base_path.to_path_buf(),
        };

        let mut upstreams = spec.child_upstreams();
        for child in spec.nodes.iter() {
            let child_path = path.child(child.id());
            match child {
                NodeSpec::Pipeline(p) => {
                    self.insert_pipeline(child_path.clone(), p, &base_path, options)?
                }
                NodeSpec::Task(t) => self.insert_task(child_path.clone(), t, &base_path, options)?,
            }
            let framed = upstreams.remove(child.id());
            if let (Some(node), Some(ups)) = (self.nodes.get_mut(&child_path), framed) {
                node.upstreams = ups;
            }
        }

        self.nodes.insert(
            path.clone(),
            GraphNode {
                path,
                description: spec.description.clone(),
                upstreams: spec.upstreams.clone(),
                base_path,
                kind: NodeKind::Pipeline(PipelineNode {
                    children: spec.nodes.iter().map(|n| n.id().to_string()).collect(),
                    continue_on_error: spec.continue_on_error,
                    force_run_all_children: spec.force_run_all_children,
                    max_parallel_tasks: spec.max_parallel_tasks,
                    initial_node: spec.initial_node.clone(),
                    final_node: spec.final_node.clone(),
                }),
                generated: false,
            },
        );
        Ok(())
    }

    fn insert_task(
        &mut self,
        path: NodePath,
        spec: &TaskSpec,
        base_path: &Path,
        options: &BuildOptions,
    ) -> Result<()> {
        let generator = spec.commands.last().and_then(|c| c.as_generator());
        let plain = if generator.is_some() {
            &spec.commands[..spec.commands.len() - 1]
        } else {
            &spec.commands[..]
        };

        // Templates are instantiated later; build them once now so unknown
        // functions are reported before the run starts.
        if let Some(generator) = &generator {
            build_commands(generator.commands(), &options.registry)?;
            build_commands(generator.commands_after(), &options.registry)?;
        }

        let commands = build_commands(plain, &options.registry)?;
        self.nodes.insert(
            path.clone(),
            GraphNode {
                path,
                description: spec.description.clone(),
                upstreams: spec.upstreams.clone(),
                base_path: base_path.to_path_buf(),
                kind: NodeKind::Task(TaskNode {
                    commands,
                    max_parallel_tasks: generator.as_ref().and_then(|g| g.max_parallel_tasks()),
                    generator,
                    max_retries: spec.max_retries.unwrap_or(options.default_max_retries),
                    children: Vec::new(),
                    expanded: false,
                }),
                generated: false,
            },
        );
        Ok(())
    }

    /// Id of the root pipeline.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn node(&self, path: &NodePath) -> Option<&GraphNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_pipeline(&self, path: &NodePath) -> bool {
        self.node(path).is_some_and(GraphNode::is_pipeline)
    }

    /// Children of a pipeline, or generated children of a task.
    pub fn children(&self, path: &NodePath) -> Vec<NodePath> {
        self.node(path)
            .map(|n| n.child_ids().iter().map(|id| path.child(id)).collect())
            .unwrap_or_default()
    }

    /// Sibling paths `path` waits for.
    pub fn dependencies(&self, path: &NodePath) -> Vec<NodePath> {
        match (self.node(path), path.parent()) {
            (Some(node), Some(parent)) => {
                node.upstreams.iter().map(|id| parent.child(id)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Sibling paths that wait for `path`.
    pub fn dependents(&self, path: &NodePath) -> Vec<NodePath> {
        let Some(parent) = path.parent() else {
            return Vec::new();
        };
        self.children(&parent)
            .into_iter()
            .filter(|sibling| {
                self.node(sibling)
                    .is_some_and(|n| n.upstreams.iter().any(|u| u == path.id()))
            })
            .collect()
    }

    /// `selection` plus the transitive closure of their upstreams among the
    /// children of `scope`.
    pub fn ancestors_in_selection(
        &self,
        scope: &NodePath,
        selection: &[String],
    ) -> Result<BTreeSet<String>> {
        let node = self
            .node(scope)
            .ok_or_else(|| RundagError::NodeNotFound(scope.to_string()))?;
        let children: HashSet<&str> = node.child_ids().iter().map(String::as_str).collect();

        let mut closure = BTreeSet::new();
        let mut stack: Vec<String> = Vec::new();
        for id in selection {
            if !children.contains(id.as_str()) {
                return Err(RundagError::NodeNotFound(scope.child(id).to_string()));
            }
            stack.push(id.clone());
        }

        while let Some(id) = stack.pop() {
            if !closure.insert(id.clone()) {
                continue;
            }
            if let Some(child) = self.node(&scope.child(&id)) {
                stack.extend(child.upstreams.iter().cloned());
            }
        }
        Ok(closure)
    }

    /// Append generated tasks below the generating task at `task_path`.
    ///
    /// Ids must be valid and unique, and upstreams may only name other
    /// generated tasks of the same batch.
    pub fn insert_generated(
        &mut self,
        task_path: &NodePath,
        tasks: Vec<GeneratedTask>,
        max_parallel_tasks: Option<usize>,
    ) -> Result<Vec<NodePath>> {
        let base_path = match self.node(task_path) {
            Some(GraphNode {
                kind: NodeKind::Task(TaskNode { expanded: false, .. }),
                base_path,
                ..
            }) => base_path.clone(),
            Some(_) => {
                return Err(RundagError::GeneratorPlacement(format!(
                    "'{task_path}' is not an unexpanded task"
                )));
            }
            None => return Err(RundagError::NodeNotFound(task_path.to_string())),
        };

        let mut ids: HashSet<&str> = HashSet::new();
        for task in tasks.iter() {
            if !is_valid_id(&task.id) {
                return Err(RundagError::InvalidId(format!(
                    "generated id '{}' below '{task_path}'",
                    task.id
                )));
            }
            if !ids.insert(task.id.as_str()) {
                return Err(RundagError::DuplicateNode(task_path.child(&task.id).to_string()));
            }
        }
        for task in tasks.iter() {
            if let Some(missing) = task.upstreams.iter().find(|u| !ids.contains(u.as_str())) {
                return Err(RundagError::UnknownDependency(format!(
                    "generated task '{}' depends on unknown '{missing}'",
                    task_path.child(&task.id)
                )));
            }
        }

        let mut paths = Vec::with_capacity(tasks.len());
        let mut child_ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            let path = task_path.child(&task.id);
            child_ids.push(task.id.clone());
            paths.push(path.clone());
            self.nodes.insert(
                path.clone(),
                GraphNode {
                    path,
                    description: task.description,
                    upstreams: task.upstreams,
                    base_path: base_path.clone(),
                    kind: NodeKind::Task(TaskNode {
                        commands: task.commands,
                        generator: None,
                        max_retries: task.max_retries,
                        children: Vec::new(),
                        expanded: false,
                        max_parallel_tasks: None,
                    }),
                    generated: true,
                },
            );
        }

        if let Some(GraphNode {
            kind: NodeKind::Task(task),
            ..
        }) = self.nodes.get_mut(task_path)
        {
            task.children = child_ids;
            task.expanded = true;
            task.max_parallel_tasks = max_parallel_tasks;
        }

        Ok(paths)
    }

    /// Depth-first walk in declaration order, yielding `(depth, node)`.
    pub fn walk(&self) -> Vec<(usize, &GraphNode)> {
        let mut out = Vec::new();
        let mut stack = vec![NodePath::root()];
        while let Some(path) = stack.pop() {
            if let Some(node) = self.node(&path) {
                out.push((path.depth(), node));
                for child in self.children(&path).into_iter().rev() {
                    stack.push(child);
                }
            }
        }
        out
    }
}
