// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`graph`] holds the node tree and its sibling dependency edges.
//! - [`cost`] estimates node durations from past runs.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which nodes are ready, when scopes finish and how failures spread.
//! - [`node_run`] provides per-run node records and scheduled task types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod cost;
pub mod graph;
pub mod node_run;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use cost::{format_duration, CostModel};
pub use graph::{BuildOptions, Graph, GraphNode, NodeKind};
pub use node_run::{NodeRun, NodeStatus, ScheduledTask};
pub use scheduler::{RunSelection, Scheduler, SchedulerSettings};
pub use scheduler_step::SchedulerStep;
