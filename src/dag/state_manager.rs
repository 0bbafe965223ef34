// src/dag/state_manager.rs

//! Per-run node state bookkeeping for the scheduler.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use crate::dag::graph::Graph;
use crate::dag::node_run::{NodeRun, NodeStatus};
use crate::types::NodePath;

/// How the upstreams of a pending node ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    /// At least one upstream is not terminal yet.
    Waiting,
    AllSucceeded,
    /// All terminal, at least one failed or was skipped.
    SomeUnsuccessful,
}

/// Owns every [`NodeRun`] of the current run.
#[derive(Debug, Default)]
pub struct StateManager {
    runs: HashMap<NodePath, NodeRun>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &NodePath) -> Option<&NodeRun> {
        self.runs.get(path)
    }

    pub fn get_mut(&mut self, path: &NodePath) -> Option<&mut NodeRun> {
        self.runs.get_mut(path)
    }

    pub fn status(&self, path: &NodePath) -> Option<NodeStatus> {
        self.runs.get(path).map(|r| r.status)
    }

    pub fn insert(&mut self, run: NodeRun) {
        self.runs.insert(run.path.clone(), run);
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRun> {
        self.runs.values()
    }

    /// Put the children of `scope` into the execution set as `Pending`.
    ///
    /// With a `selection`, only those child ids take part; a selected node
    /// whose upstream is not selected waits for that upstream's own
    /// (selected) upstreams instead. Returns the new members in
    /// declaration order.
    pub fn activate_scope(
        &mut self,
        graph: &Graph,
        scope: &NodePath,
        selection: Option<&BTreeSet<String>>,
    ) -> Vec<NodePath> {
        let children = graph.children(scope);
        let members: Vec<NodePath> = children
            .iter()
            .filter(|c| selection.is_none_or(|s| s.contains(c.id())))
            .cloned()
            .collect();
        let member_ids: HashSet<&str> = members.iter().map(NodePath::id).collect();

        let mut upstreams: HashMap<NodePath, Vec<NodePath>> = HashMap::new();
        for member in members.iter() {
            let mut effective = BTreeSet::new();
            let mut visited = HashSet::new();
            let mut stack: Vec<NodePath> = graph.dependencies(member);
            while let Some(up) = stack.pop() {
                if !visited.insert(up.clone()) {
                    continue;
                }
                if member_ids.contains(up.id()) {
                    effective.insert(up);
                } else {
                    // Not selected: depend on whatever it depends on.
                    stack.extend(graph.dependencies(&up));
                }
            }
            upstreams.insert(member.clone(), effective.into_iter().collect());
        }

        let mut downstreams: HashMap<NodePath, Vec<NodePath>> = HashMap::new();
        for (member, ups) in upstreams.iter() {
            for up in ups {
                downstreams.entry(up.clone()).or_default().push(member.clone());
            }
        }

        for member in members.iter() {
            if self.runs.contains_key(member) {
                warn!(node = %member, "node already part of this run; not re-adding");
                continue;
            }
            let mut run = NodeRun::new(member.clone(), graph.is_pipeline(member));
            run.upstreams = upstreams.remove(member).unwrap_or_default();
            let mut downs = downstreams.remove(member).unwrap_or_default();
            downs.sort();
            run.downstreams = downs;
            debug!(node = %member, upstreams = run.upstreams.len(), "marked Pending for this run");
            self.runs.insert(member.clone(), run);
        }

        members
    }

    /// Members of `scope` that take part in this run, in declaration order.
    pub fn members(&self, graph: &Graph, scope: &NodePath) -> Vec<NodePath> {
        graph
            .children(scope)
            .into_iter()
            .filter(|c| self.runs.contains_key(c))
            .collect()
    }

    pub fn upstream_state(&self, path: &NodePath) -> UpstreamState {
        let Some(run) = self.runs.get(path) else {
            return UpstreamState::Waiting;
        };
        let mut all_succeeded = true;
        for up in run.upstreams.iter() {
            match self.status(up) {
                Some(NodeStatus::Succeeded) => {}
                Some(NodeStatus::Failed) | Some(NodeStatus::Skipped) => all_succeeded = false,
                _ => return UpstreamState::Waiting,
            }
        }
        if all_succeeded {
            UpstreamState::AllSucceeded
        } else {
            UpstreamState::SomeUnsuccessful
        }
    }

    pub fn all_terminal(&self, members: &[NodePath]) -> bool {
        members
            .iter()
            .all(|m| self.status(m).is_some_and(|s| s.is_terminal()))
    }

    pub fn count_with(&self, members: &[NodePath], status: NodeStatus) -> usize {
        members
            .iter()
            .filter(|m| self.status(m) == Some(status))
            .count()
    }

    /// Mark every `Pending` / `Ready` node `Skipped`; returns them.
    pub fn skip_unstarted(&mut self) -> Vec<NodePath> {
        let mut skipped = Vec::new();
        for run in self.runs.values_mut() {
            if matches!(run.status, NodeStatus::Pending | NodeStatus::Ready) {
                run.status = NodeStatus::Skipped;
                skipped.push(run.path.clone());
            }
        }
        skipped.sort();
        skipped
    }
}
