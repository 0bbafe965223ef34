#![allow(dead_code)]

use std::collections::VecDeque;

use rundag::config::PipelineSpec;
use rundag::dag::{
    BuildOptions, CostModel, Graph, RunSelection, ScheduledTask, Scheduler, SchedulerSettings,
    SchedulerStep,
};
use rundag::engine::TaskOutcome;
use rundag::events::Event;
use rundag::expand::{Expansion, ExpansionRequest, GeneratedTask, LaunchError};
use rundag::types::NodePath;

pub use rundag_test_utils::{
    init_tracing, with_timeout, ConfigFileBuilder, PipelineSpecBuilder, TaskSpecBuilder,
};

pub fn path(s: &str) -> NodePath {
    s.parse().expect("valid node path")
}

pub fn scheduler(root: &PipelineSpec, max_parallel_tasks: usize) -> Scheduler {
    scheduler_with(root, max_parallel_tasks, CostModel::empty(), RunSelection::default())
}

pub fn scheduler_with(
    root: &PipelineSpec,
    max_parallel_tasks: usize,
    cost: CostModel,
    selection: RunSelection,
) -> Scheduler {
    let graph = Graph::build(root, &BuildOptions::default()).expect("valid graph");
    Scheduler::new(
        graph,
        cost,
        SchedulerSettings { max_parallel_tasks },
        1,
        selection,
    )
    .expect("valid scheduler")
}

/// Generated tasks with no commands and no dependencies between them.
pub fn expansion_of(ids: &[&str]) -> Expansion {
    Expansion {
        tasks: ids
            .iter()
            .map(|id| GeneratedTask {
                id: id.to_string(),
                description: id.to_string(),
                upstreams: Vec::new(),
                commands: Vec::new(),
                max_retries: 0,
            })
            .collect(),
        max_parallel_tasks: None,
    }
}

/// Drives a scheduler synchronously, completing attempts in dispatch order.
pub struct Driver {
    pub scheduler: Scheduler,
    pub events: Vec<Event>,
    pub dispatched: Vec<(NodePath, u32)>,
    pub cancel_requests: Vec<bool>,
    pending: VecDeque<ScheduledTask>,
    expansions: VecDeque<ExpansionRequest>,
}

impl Driver {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            events: Vec::new(),
            dispatched: Vec::new(),
            cancel_requests: Vec::new(),
            pending: VecDeque::new(),
            expansions: VecDeque::new(),
        }
    }

    pub fn absorb(&mut self, step: SchedulerStep) {
        self.events.extend(step.events);
        for task in step.dispatch {
            self.dispatched.push((task.path.clone(), task.attempt));
            self.pending.push_back(task);
        }
        self.expansions.extend(step.expand);
        if let Some(forced) = step.cancel_running {
            self.cancel_requests.push(forced);
        }
    }

    pub fn start(&mut self) {
        let step = self.scheduler.start();
        self.absorb(step);
    }

    pub fn pending_paths(&self) -> Vec<String> {
        self.pending.iter().map(|t| t.path.to_string()).collect()
    }

    /// Complete the oldest outstanding attempt. Returns false if none.
    pub fn complete_next(&mut self, outcome: impl FnOnce(&NodePath, u32) -> TaskOutcome) -> bool {
        let Some(task) = self.pending.pop_front() else {
            return false;
        };
        let result = outcome(&task.path, task.attempt);
        let step = self.scheduler.on_task_completed(&task.path, task.attempt, result);
        self.absorb(step);
        true
    }

    /// Answer the oldest outstanding generator. Returns false if none.
    pub fn expand_next(
        &mut self,
        expand: impl FnOnce(&ExpansionRequest) -> Result<Expansion, LaunchError>,
    ) -> bool {
        let Some(request) = self.expansions.pop_front() else {
            return false;
        };
        let result = expand(&request);
        let step = self.scheduler.on_expansion_finished(&request.path, result);
        self.absorb(step);
        true
    }

    /// Run until nothing is outstanding. Generators get an empty expansion.
    pub fn run(&mut self, mut outcome: impl FnMut(&NodePath, u32) -> TaskOutcome) {
        self.run_with(&mut outcome, |_| Ok(Expansion::default()));
    }

    pub fn run_with(
        &mut self,
        mut outcome: impl FnMut(&NodePath, u32) -> TaskOutcome,
        mut expand: impl FnMut(&ExpansionRequest) -> Result<Expansion, LaunchError>,
    ) {
        loop {
            if self.complete_next(&mut outcome) {
                continue;
            }
            if self.expand_next(&mut expand) {
                continue;
            }
            break;
        }
    }

    pub fn attempts(&self, p: &str) -> usize {
        self.dispatched.iter().filter(|(d, _)| d.to_string() == p).count()
    }

    pub fn dispatch_order(&self) -> Vec<String> {
        self.dispatched.iter().map(|(p, _)| p.to_string()).collect()
    }

    pub fn started_at(&self, p: &str) -> Option<usize> {
        let p = path(p);
        self.events
            .iter()
            .position(|e| matches!(e, Event::NodeStarted { node_path, .. } if *node_path == p))
    }

    pub fn finished_at(&self, p: &str) -> Option<usize> {
        let p = path(p);
        self.events
            .iter()
            .position(|e| matches!(e, Event::NodeFinished { node_path, .. } if *node_path == p))
    }

    pub fn finished(&self, p: &str) -> Vec<bool> {
        let p = path(p);
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::NodeFinished {
                    node_path,
                    succeeded,
                    ..
                } if *node_path == p => Some(*succeeded),
                _ => None,
            })
            .collect()
    }

    pub fn run_finished(&self) -> Option<bool> {
        self.events.iter().find_map(|e| match e {
            Event::RunFinished { succeeded, .. } => Some(*succeeded),
            _ => None,
        })
    }
}

pub fn fail() -> TaskOutcome {
    TaskOutcome::Failed { exit_code: Some(1) }
}

/// Outcome function failing exactly the given paths.
pub fn failing(paths: &'static [&'static str]) -> impl FnMut(&NodePath, u32) -> TaskOutcome {
    move |p, _| {
        if paths.iter().any(|f| p.to_string() == *f) {
            fail()
        } else {
            TaskOutcome::Succeeded
        }
    }
}
