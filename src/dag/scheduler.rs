// src/dag/scheduler.rs

//! Run coordinator state machine.
//!
//! The scheduler is synchronous and performs no IO. Every entry point
//! returns a [`SchedulerStep`] describing what the IO shell must do next:
//! task attempts to dispatch, generators to expand, events to publish.
//!
//! Rules, per scope (a pipeline, or a generating task once expanded):
//! - a member becomes ready once all its upstreams are terminal; with a
//!   failed or skipped upstream it is skipped unless the scope has
//!   `force_run_all_children`,
//! - a failing member halts the scope unless it has `continue_on_error`;
//!   nothing below a halted scope is dispatched unless that scope has
//!   `force_run_all_children`,
//! - a scope finishes once all its members are terminal, and fails if any
//!   member failed. Its parent then evaluates that failure the same way.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::cost::{format_duration, CostModel};
use crate::dag::graph::{Graph, NodeKind};
use crate::dag::node_run::{NodeRun, NodeStatus, ScheduledTask};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{StateManager, UpstreamState};
use crate::engine::TaskOutcome;
use crate::errors::{Result, RundagError};
use crate::events::Event;
use crate::expand::{Expansion, ExpansionRequest, LaunchError};
use crate::types::{NodePath, OutputFormat};

/// What to run within the graph.
#[derive(Debug, Clone, Default)]
pub struct RunSelection {
    /// Pipeline to run; the root pipeline by default.
    pub root: NodePath,
    /// Restrict the run to these children of `root`.
    pub nodes: Option<Vec<String>>,
    /// Also run every upstream of the selected nodes.
    pub with_upstreams: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Global cap on running tasks. Pipelines never take a slot.
    pub max_parallel_tasks: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct ReadyEntry {
    priority: f64,
    path: NodePath,
}

impl Eq for ReadyEntry {}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest priority first; ties go to the lexically smallest path.
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.path.cmp(&self.path))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct Scheduler {
    graph: Graph,
    cost: CostModel,
    settings: SchedulerSettings,
    run_id: u64,
    root: NodePath,
    selection: Option<BTreeSet<String>>,
    state: StateManager,
    ready: BinaryHeap<ReadyEntry>,
    priorities: HashMap<NodePath, f64>,
    running_tasks: usize,
    running_in_scope: HashMap<NodePath, usize>,
    peak_running_tasks: usize,
    halted: HashSet<NodePath>,
    failed_tasks: usize,
    stopping: bool,
    started: bool,
    succeeded: Option<bool>,
}

impl Scheduler {
    pub fn new(
        graph: Graph,
        cost: CostModel,
        settings: SchedulerSettings,
        run_id: u64,
        selection: RunSelection,
    ) -> Result<Self> {
        if settings.max_parallel_tasks == 0 {
            return Err(RundagError::ConfigError(
                "max_parallel_tasks must be >= 1".to_string(),
            ));
        }
        match graph.node(&selection.root) {
            Some(node) if node.is_pipeline() => {}
            Some(_) => {
                return Err(RundagError::ConfigError(format!(
                    "'{}' is a task; runs start at a pipeline",
                    selection.root
                )));
            }
            None => return Err(RundagError::NodeNotFound(selection.root.to_string())),
        }

        let selected = match &selection.nodes {
            Some(ids) if selection.with_upstreams => {
                Some(graph.ancestors_in_selection(&selection.root, ids)?)
            }
            Some(ids) => {
                // Validates that every id exists.
                graph.ancestors_in_selection(&selection.root, ids)?;
                Some(ids.iter().cloned().collect())
            }
            None => None,
        };
        let selected = selected.map(|mut ids| {
            let frames = graph
                .node(&selection.root)
                .and_then(|n| n.as_pipeline())
                .map(|p| p.frame_nodes().cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            for frame in frames {
                if ids.insert(frame.clone()) {
                    info!(node = %selection.root.child(&frame), "adding framing node to selection");
                }
            }
            ids
        });

        Ok(Self {
            graph,
            cost,
            settings,
            run_id,
            root: selection.root,
            selection: selected,
            state: StateManager::new(),
            ready: BinaryHeap::new(),
            priorities: HashMap::new(),
            running_tasks: 0,
            running_in_scope: HashMap::new(),
            peak_running_tasks: 0,
            halted: HashSet::new(),
            failed_tasks: 0,
            stopping: false,
            started: false,
            succeeded: None,
        })
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn root(&self) -> &NodePath {
        &self.root
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn status(&self, path: &NodePath) -> Option<NodeStatus> {
        self.state.status(path)
    }

    pub fn node_run(&self, path: &NodePath) -> Option<&NodeRun> {
        self.state.get(path)
    }

    pub fn node_runs(&self) -> impl Iterator<Item = &NodeRun> {
        self.state.iter()
    }

    pub fn running_tasks(&self) -> usize {
        self.running_tasks
    }

    pub fn peak_running_tasks(&self) -> usize {
        self.peak_running_tasks
    }

    pub fn is_finished(&self) -> bool {
        self.succeeded.is_some()
    }

    /// `Some(succeeded)` once the run finished.
    pub fn succeeded(&self) -> Option<bool> {
        self.succeeded
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Start the run: activate the root pipeline and dispatch what is ready.
    pub fn start(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.started {
            warn!(run_id = self.run_id, "run already started; ignoring start request");
            return step;
        }
        self.started = true;
        info!(run_id = self.run_id, root = %self.root, "starting run");

        step.events.push(Event::RunStarted {
            run_id: self.run_id,
            node_path: self.root.clone(),
        });

        let root = self.root.clone();
        self.state.insert(NodeRun::new(root.clone(), true));
        self.start_pipeline(&root, &mut step);
        self.fill_slots(&mut step);
        step
    }

    /// Handle the end of a task attempt.
    pub fn on_task_completed(
        &mut self,
        path: &NodePath,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(run) = self.state.get(path) else {
            warn!(node = %path, "completion for node outside this run; ignoring");
            return step;
        };
        if run.status != NodeStatus::Running || run.attempt_count != attempt {
            warn!(
                node = %path,
                attempt,
                current_attempt = run.attempt_count,
                status = ?run.status,
                "stale task completion; ignoring"
            );
            return step;
        }

        self.release_slot(path);
        let max_retries = self.max_retries(path);

        match outcome {
            TaskOutcome::Succeeded => {
                info!(node = %path, run_id = self.run_id, attempt, "task succeeded");
                self.finish_task(path, true, &mut step);
            }
            TaskOutcome::Failed { exit_code } if !self.stopping && attempt <= max_retries => {
                warn!(
                    node = %path,
                    run_id = self.run_id,
                    attempt,
                    ?exit_code,
                    "task failed; retrying"
                );
                step.events.push(Event::output(
                    path,
                    format!("failed, retry {attempt} of {max_retries}"),
                    OutputFormat::Italics,
                    true,
                ));
                if let Some(run) = self.state.get_mut(path) {
                    run.status = NodeStatus::Ready;
                }
                self.push_ready(path);
            }
            other => {
                warn!(node = %path, run_id = self.run_id, attempt, outcome = ?other, "task failed");
                if let TaskOutcome::LaunchFailed(message) = &other {
                    step.events
                        .push(Event::output(path, message.clone(), OutputFormat::Verbatim, true));
                }
                if other == TaskOutcome::Cancelled {
                    step.events
                        .push(Event::output(path, "cancelled", OutputFormat::Italics, true));
                }
                self.finish_task(path, false, &mut step);
            }
        }

        self.fill_slots(&mut step);
        step
    }

    /// Handle the result of a generator.
    pub fn on_expansion_finished(
        &mut self,
        path: &NodePath,
        result: std::result::Result<Expansion, LaunchError>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.state.get(path) {
            Some(run) if run.status == NodeStatus::Running => {}
            _ => {
                debug!(
                    node = %path,
                    "expansion result for node that is no longer running; ignoring"
                );
                return step;
            }
        }

        let outcome = if self.stopping {
            Err(LaunchError::new("run stopped before generated tasks could start"))
        } else {
            result.and_then(|expansion| {
                let count = expansion.tasks.len();
                self.graph
                    .insert_generated(path, expansion.tasks, expansion.max_parallel_tasks)
                    .map(|_| count)
                    .map_err(|e| LaunchError::new(e.to_string()))
            })
        };

        match outcome {
            Ok(count) => {
                info!(node = %path, generated = count, "generated tasks inserted");
                step.events.push(Event::output(
                    path,
                    format!("launched {count} tasks"),
                    OutputFormat::Italics,
                    false,
                ));
                self.state.activate_scope(&self.graph, path, None);
                self.evaluate_scope(path, &mut step);
            }
            Err(e) => {
                warn!(node = %path, error = %e, "generator failed");
                step.events
                    .push(Event::output(path, e.message, OutputFormat::Verbatim, true));
                self.finish_generator_failed(path, &mut step);
            }
        }

        self.fill_slots(&mut step);
        step
    }

    /// Stop dispatching. Unstarted nodes become skipped and the run fails.
    ///
    /// `forced` additionally asks the executor to kill running tasks and
    /// fails generators that are still enumerating.
    pub fn request_stop(&mut self, forced: bool) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.is_finished() {
            return step;
        }
        if self.stopping && !forced {
            return step;
        }
        info!(run_id = self.run_id, forced, "stop requested");
        self.stopping = true;
        self.ready.clear();

        let skipped = self.state.skip_unstarted();
        debug!(skipped = skipped.len(), "skipped unstarted nodes");

        if forced {
            let unexpanded: Vec<NodePath> = self
                .state
                .iter()
                .filter(|r| {
                    r.status == NodeStatus::Running && self.is_unexpanded_generator(&r.path)
                })
                .map(|r| r.path.clone())
                .collect();
            for path in unexpanded {
                step.events
                    .push(Event::output(&path, "stopped", OutputFormat::Italics, true));
                self.finish_generator_failed(&path, &mut step);
            }
        }

        // Innermost scopes first so finished scopes cascade upwards.
        let mut scopes: Vec<NodePath> = self
            .state
            .iter()
            .filter(|r| r.status == NodeStatus::Running && self.is_active_scope(&r.path))
            .map(|r| r.path.clone())
            .collect();
        scopes.sort_by_key(|p| std::cmp::Reverse(p.depth()));
        for scope in scopes {
            self.try_finish_scope(&scope, &mut step);
        }

        step.cancel_running = Some(forced);
        step
    }

    fn max_retries(&self, path: &NodePath) -> u32 {
        self.graph
            .node(path)
            .and_then(|n| n.as_task())
            .map(|t| t.max_retries)
            .unwrap_or(0)
    }

    fn is_unexpanded_generator(&self, path: &NodePath) -> bool {
        self.graph
            .node(path)
            .and_then(|n| n.as_task())
            .is_some_and(|t| t.generator.is_some() && !t.expanded)
    }

    /// Pipelines, and generating tasks once their children exist.
    fn is_active_scope(&self, path: &NodePath) -> bool {
        match self.graph.node(path).map(|n| &n.kind) {
            Some(NodeKind::Pipeline(_)) => true,
            Some(NodeKind::Task(t)) => t.generator.is_some() && t.expanded,
            None => false,
        }
    }

    fn continue_on_error(&self, scope: &NodePath) -> bool {
        self.graph
            .node(scope)
            .and_then(|n| n.as_pipeline())
            .is_some_and(|p| p.continue_on_error)
    }

    fn force_run_all_children(&self, scope: &NodePath) -> bool {
        self.graph
            .node(scope)
            .and_then(|n| n.as_pipeline())
            .is_some_and(|p| p.force_run_all_children)
    }

    fn scope_limit(&self, scope: &NodePath) -> Option<usize> {
        match self.graph.node(scope).map(|n| &n.kind) {
            Some(NodeKind::Pipeline(p)) => p.max_parallel_tasks,
            Some(NodeKind::Task(t)) => t.max_parallel_tasks,
            None => None,
        }
    }

    /// True if some scope from `scope` up to the run root is halted
    /// without `force_run_all_children`.
    fn blocked_by_halt(&self, scope: &NodePath) -> bool {
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            if self.halted.contains(&s) && !self.force_run_all_children(&s) {
                return true;
            }
            if s == self.root {
                break;
            }
            current = s.parent();
        }
        false
    }

    fn mark_failure(&mut self, scope: &NodePath) {
        if !self.continue_on_error(scope) && self.halted.insert(scope.clone()) {
            info!(scope = %scope, "halting scope after failure");
        }
    }

    fn priority(&mut self, path: &NodePath) -> f64 {
        if let Some(p) = self.priorities.get(path) {
            return *p;
        }
        let downstreams = self
            .state
            .get(path)
            .map(|r| r.downstreams.clone())
            .unwrap_or_default();
        let tail = downstreams
            .iter()
            .map(|d| self.priority(d))
            .fold(0.0_f64, f64::max);
        let priority = self.cost.own_cost(path) + tail;
        self.priorities.insert(path.clone(), priority);
        priority
    }

    fn push_ready(&mut self, path: &NodePath) {
        let priority = self.priority(path);
        debug!(node = %path, priority, "node ready");
        self.ready.push(ReadyEntry {
            priority,
            path: path.clone(),
        });
    }

    fn emit_expected_duration(&self, path: &NodePath, step: &mut SchedulerStep) {
        if let Some(expected) = self.cost.expected_duration(path).filter(|d| *d > 0.0) {
            step.events.push(Event::output(
                path,
                format!("★ {}", format_duration(expected)),
                OutputFormat::Italics,
                false,
            ));
        }
    }

    fn start_pipeline(&mut self, path: &NodePath, step: &mut SchedulerStep) {
        if let Some(run) = self.state.get_mut(path) {
            run.status = NodeStatus::Running;
            run.start_time = Some(Utc::now());
        }
        step.events.push(Event::NodeStarted {
            node_path: path.clone(),
            is_pipeline: true,
        });
        self.emit_expected_duration(path, step);

        let selection = if *path == self.root {
            self.selection.clone()
        } else {
            None
        };
        self.state.activate_scope(&self.graph, path, selection.as_ref());
        self.evaluate_scope(path, step);
    }

    /// Promote or skip pending members whose upstreams are terminal, then
    /// finish the scope if nothing is left.
    fn evaluate_scope(&mut self, scope: &NodePath, step: &mut SchedulerStep) {
        let members = self.state.members(&self.graph, scope);
        let force = self.force_run_all_children(scope);

        loop {
            let mut changed = false;
            for member in members.iter() {
                if self.state.status(member) != Some(NodeStatus::Pending) {
                    continue;
                }
                let next = match self.state.upstream_state(member) {
                    UpstreamState::Waiting => continue,
                    _ if self.blocked_by_halt(scope) => NodeStatus::Skipped,
                    UpstreamState::AllSucceeded => NodeStatus::Ready,
                    UpstreamState::SomeUnsuccessful if force => NodeStatus::Ready,
                    UpstreamState::SomeUnsuccessful => NodeStatus::Skipped,
                };
                if let Some(run) = self.state.get_mut(member) {
                    run.status = next;
                }
                if next == NodeStatus::Ready {
                    self.push_ready(member);
                } else {
                    debug!(node = %member, "skipping node");
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        self.try_finish_scope(scope, step);
    }

    fn try_finish_scope(&mut self, scope: &NodePath, step: &mut SchedulerStep) {
        if self.state.status(scope) != Some(NodeStatus::Running) || !self.is_active_scope(scope) {
            return;
        }
        let members = self.state.members(&self.graph, scope);
        if !self.state.all_terminal(&members) {
            return;
        }

        let failed = self.state.count_with(&members, NodeStatus::Failed) > 0
            || (self.stopping && self.state.count_with(&members, NodeStatus::Skipped) > 0);
        let succeeded = !failed;

        if let Some(run) = self.state.get_mut(scope) {
            run.status = if succeeded {
                NodeStatus::Succeeded
            } else {
                NodeStatus::Failed
            };
            run.end_time = Some(Utc::now());
        }
        info!(node = %scope, succeeded, "scope finished");
        step.events.push(Event::NodeFinished {
            node_path: scope.clone(),
            is_pipeline: true,
            succeeded,
        });

        self.after_terminal(scope, succeeded, step);
    }

    /// Propagate a terminal node to its enclosing scope (or end the run).
    fn after_terminal(&mut self, path: &NodePath, succeeded: bool, step: &mut SchedulerStep) {
        if *path == self.root {
            self.finish_run(step);
            return;
        }
        let Some(parent) = path.parent() else {
            self.finish_run(step);
            return;
        };
        if !succeeded {
            self.mark_failure(&parent);
        }
        self.evaluate_scope(&parent, step);
    }

    fn finish_task(&mut self, path: &NodePath, succeeded: bool, step: &mut SchedulerStep) {
        if let Some(run) = self.state.get_mut(path) {
            run.status = if succeeded {
                NodeStatus::Succeeded
            } else {
                NodeStatus::Failed
            };
            run.end_time = Some(Utc::now());
        }
        if !succeeded {
            self.failed_tasks += 1;
        }
        step.events.push(Event::NodeFinished {
            node_path: path.clone(),
            is_pipeline: false,
            succeeded,
        });
        self.after_terminal(path, succeeded, step);
    }

    fn finish_generator_failed(&mut self, path: &NodePath, step: &mut SchedulerStep) {
        if let Some(run) = self.state.get_mut(path) {
            run.status = NodeStatus::Failed;
            run.end_time = Some(Utc::now());
        }
        self.failed_tasks += 1;
        step.events.push(Event::NodeFinished {
            node_path: path.clone(),
            is_pipeline: true,
            succeeded: false,
        });
        self.after_terminal(path, false, step);
    }

    fn finish_run(&mut self, step: &mut SchedulerStep) {
        if self.succeeded.is_some() {
            return;
        }
        let succeeded = self.failed_tasks == 0 && !self.stopping;
        self.succeeded = Some(succeeded);
        self.ready.clear();
        info!(
            run_id = self.run_id,
            succeeded,
            failed_tasks = self.failed_tasks,
            "run finished"
        );
        step.events.push(Event::RunFinished {
            run_id: self.run_id,
            succeeded,
        });
        step.run_finished = Some(succeeded);
    }

    fn release_slot(&mut self, path: &NodePath) {
        self.running_tasks = self.running_tasks.saturating_sub(1);
        if let Some(scope) = path.parent() {
            if let Some(count) = self.running_in_scope.get_mut(&scope) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Dispatch ready nodes, highest priority first, within the limits.
    fn fill_slots(&mut self, step: &mut SchedulerStep) {
        if self.stopping || self.is_finished() {
            return;
        }

        let mut deferred = Vec::new();
        while let Some(entry) = self.ready.pop() {
            let path = entry.path.clone();
            if self.state.status(&path) != Some(NodeStatus::Ready) {
                continue;
            }
            let Some(scope) = path.parent() else {
                continue;
            };

            if self.blocked_by_halt(&scope) {
                debug!(node = %path, "enclosing scope halted; skipping");
                if let Some(run) = self.state.get_mut(&path) {
                    run.status = NodeStatus::Skipped;
                }
                self.evaluate_scope(&scope, step);
                continue;
            }

            if !self.graph.contains(&path) {
                warn!(node = %path, "ready node missing from graph");
                continue;
            }
            if self.graph.is_pipeline(&path) {
                self.start_pipeline(&path, step);
            } else if self.is_unexpanded_generator(&path) {
                self.start_generator(&path, step);
            } else {
                let scope_full = self.scope_limit(&scope).is_some_and(|limit| {
                    self.running_in_scope.get(&scope).copied().unwrap_or(0) >= limit
                });
                if self.running_tasks >= self.settings.max_parallel_tasks || scope_full {
                    deferred.push(entry);
                    continue;
                }
                self.dispatch_task(&path, &scope, step);
            }

            if self.is_finished() {
                break;
            }
        }

        self.ready.extend(deferred);
    }

    fn start_generator(&mut self, path: &NodePath, step: &mut SchedulerStep) {
        let Some(node) = self.graph.node(path) else {
            return;
        };
        let Some(task) = node.as_task() else {
            return;
        };
        let Some(generator) = task.generator.clone() else {
            return;
        };
        let request = ExpansionRequest {
            path: path.clone(),
            generator,
            before: task.commands.clone(),
            base_path: node.base_path.clone(),
            max_retries: task.max_retries,
        };

        if let Some(run) = self.state.get_mut(path) {
            run.status = NodeStatus::Running;
            run.attempt_count = 1;
            run.start_time = Some(Utc::now());
        }
        info!(node = %path, run_id = self.run_id, "launching generator");
        step.events.push(Event::NodeStarted {
            node_path: path.clone(),
            is_pipeline: true,
        });
        self.emit_expected_duration(path, step);
        step.expand.push(request);
    }

    fn dispatch_task(&mut self, path: &NodePath, scope: &NodePath, step: &mut SchedulerStep) {
        let Some(node) = self.graph.node(path) else {
            return;
        };
        let Some(task) = node.as_task() else {
            return;
        };
        let commands = task.commands.clone();
        let base_path = node.base_path.clone();

        let attempt = match self.state.get_mut(path) {
            Some(run) => {
                run.status = NodeStatus::Running;
                run.attempt_count += 1;
                if run.start_time.is_none() {
                    run.start_time = Some(Utc::now());
                }
                run.attempt_count
            }
            None => return,
        };

        self.running_tasks += 1;
        *self.running_in_scope.entry(scope.clone()).or_insert(0) += 1;
        self.peak_running_tasks = self.peak_running_tasks.max(self.running_tasks);

        if attempt == 1 {
            info!(node = %path, run_id = self.run_id, "dispatching task");
            step.events.push(Event::NodeStarted {
                node_path: path.clone(),
                is_pipeline: false,
            });
            self.emit_expected_duration(path, step);
        } else {
            info!(node = %path, run_id = self.run_id, attempt, "dispatching retry");
        }

        step.dispatch.push(ScheduledTask {
            path: path.clone(),
            run_id: self.run_id,
            attempt,
            commands,
            base_path,
        });
    }
}
