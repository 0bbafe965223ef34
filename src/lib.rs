// src/lib.rs

pub mod cli;
pub mod command;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod expand;
pub mod fs;
pub mod history;
pub mod incremental;
pub mod logging;
pub mod types;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, CliCommand, RunArgs};
use crate::command::{ExecSettings, ExecutionEnv, FunctionRegistry};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{
    BuildOptions, CostModel, Graph, NodeKind, RunSelection, Scheduler, SchedulerSettings,
};
use crate::engine::{CoreRuntime, RunReport, Runtime, RuntimeEvent};
use crate::errors::{Result, RundagError};
use crate::events::{
    ConsoleSubscriber, EventBus, EventSubscriber, HistoryRecorder, LoggingSubscriber,
};
use crate::exec::RealExecutorBackend;
use crate::expand::Expander;
use crate::fs::RealFileSystem;
use crate::history::{FileRunHistory, MemoryRunHistory, RunHistory};
use crate::incremental::{
    FileIncrementalStore, IncrementalStore, IncrementalTracker, MemoryIncrementalStore,
};
use crate::types::{NodePath, StateStorageMode};

/// Everything about one run that does not come from the config file.
pub struct RunOptions {
    pub selection: RunSelection,
    pub registry: FunctionRegistry,
    /// Render `Output` events on stdout.
    pub console: bool,
    /// Style console output; ignored without `console`.
    pub styled: bool,
    /// Stop on Ctrl-C: first graceful, then forced.
    pub handle_ctrl_c: bool,
    /// Registered after the built-in subscribers.
    pub subscribers: Vec<Box<dyn EventSubscriber>>,
    /// Defaults to the current time in milliseconds.
    pub run_id: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            selection: RunSelection::default(),
            registry: FunctionRegistry::new(),
            console: false,
            styled: false,
            handle_ctrl_c: false,
            subscribers: Vec::new(),
            run_id: None,
        }
    }
}

/// High-level entry point used by `main.rs`.
///
/// Returns whether the command succeeded; validation problems and
/// infrastructure faults are errors.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    match args.command {
        CliCommand::Run(run_args) => {
            let options = run_options_from_args(&cfg, &run_args)?;
            let report = run_pipeline(&cfg, options).await?;
            Ok(report.succeeded)
        }
        CliCommand::Check => {
            let graph = Graph::build(&cfg.pipeline, &build_options(&cfg, FunctionRegistry::new()))?;
            print!("{}", render_tree(&graph));
            Ok(true)
        }
        CliCommand::ResetIncremental { path } => {
            let path: NodePath = path.parse().map_err(RundagError::ConfigError)?;
            let removed = reset_incremental(&cfg, &path)?;
            println!("removed {removed} incremental state entries below {path}");
            Ok(true)
        }
    }
}

/// Process exit code for the result of [`run`].
///
/// `0` success, `1` any failure, `2` validation error before the run.
pub fn exit_code(result: &Result<bool>) -> i32 {
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) if e.is_validation() => 2,
        Err(_) => 1,
    }
}

fn run_options_from_args(cfg: &ConfigFile, args: &RunArgs) -> Result<RunOptions> {
    let root = match &args.path {
        Some(p) => p.parse().map_err(RundagError::ConfigError)?,
        None => NodePath::root(),
    };
    let nodes = if args.nodes.is_empty() {
        None
    } else {
        Some(args.nodes.clone())
    };
    Ok(RunOptions {
        selection: RunSelection {
            root,
            nodes,
            with_upstreams: args.with_upstreams,
        },
        console: true,
        styled: !(args.disable_colors || cfg.config.disable_output_styling),
        handle_ctrl_c: true,
        ..RunOptions::default()
    })
}

fn build_options(cfg: &ConfigFile, registry: FunctionRegistry) -> BuildOptions {
    BuildOptions {
        registry,
        default_max_retries: cfg.config.default_task_max_retries,
        base_path: cfg
            .pipeline
            .base_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

fn open_stores(cfg: &ConfigFile) -> Result<(Box<dyn IncrementalStore>, Arc<dyn RunHistory>)> {
    match cfg.config.state_storage_mode {
        StateStorageMode::File => {
            let dir = &cfg.config.state_dir;
            debug!(state_dir = ?dir, "using file-backed state");
            Ok((
                Box::new(FileIncrementalStore::open(dir)?),
                Arc::new(FileRunHistory::new(dir)),
            ))
        }
        StateStorageMode::Memory => Ok((
            Box::new(MemoryIncrementalStore::new()),
            Arc::new(MemoryRunHistory::new()),
        )),
    }
}

/// Build, schedule and execute one run with the real executor.
///
/// Ordinary task failures are reported through [`RunReport::succeeded`];
/// only validation errors and infrastructure faults are returned as `Err`.
pub async fn run_pipeline(cfg: &ConfigFile, options: RunOptions) -> Result<RunReport> {
    let RunOptions {
        selection,
        registry,
        console,
        styled,
        handle_ctrl_c,
        subscribers: extra_subscribers,
        run_id,
    } = options;

    let graph = Graph::build(&cfg.pipeline, &build_options(cfg, registry.clone()))?;
    let (store, history) = open_stores(cfg)?;
    let cost = CostModel::load(history.as_ref(), &selection.root)?;
    let run_id = run_id.unwrap_or_else(|| Utc::now().timestamp_millis().max(0) as u64);

    let scheduler = Scheduler::new(
        graph,
        cost,
        SchedulerSettings {
            max_parallel_tasks: cfg.config.max_parallel_tasks,
        },
        run_id,
        selection,
    )?;

    let mut subscribers: Vec<Box<dyn EventSubscriber>> = vec![Box::new(LoggingSubscriber)];
    if console {
        subscribers.push(Box::new(ConsoleSubscriber::new(styled)));
    }
    subscribers.push(Box::new(HistoryRecorder::new(Arc::clone(&history))));
    subscribers.extend(extra_subscribers);
    let bus = EventBus::with_password_masks(subscribers, cfg.config.password_masks.clone());

    let env = Arc::new(ExecutionEnv {
        settings: ExecSettings::from_config(&cfg.config, &cfg.databases),
        tracker: IncrementalTracker::new(store),
        fs: Arc::new(RealFileSystem),
        publisher: bus.publisher(),
    });

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let executor = RealExecutorBackend::new(rt_tx.clone(), Arc::clone(&env));
    let expander = Expander::new(registry, Arc::clone(&env));

    // Ctrl-C: first → graceful stop, second → forced stop.
    let signal_handle = handle_ctrl_c.then(|| {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            for forced in [false, true] {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
                info!(forced, "Ctrl+C received; stopping run");
                if tx.send(RuntimeEvent::StopRequested { forced }).await.is_err() {
                    return;
                }
            }
        })
    });

    let runtime = Runtime::new(
        CoreRuntime::new(scheduler),
        rt_rx,
        rt_tx,
        executor,
        expander,
        bus.publisher(),
    );
    let result = runtime.run().await;

    if let Some(handle) = signal_handle {
        handle.abort();
    }
    bus.shutdown().await?;

    let report = result?;
    info!(
        run_id = report.run_id,
        succeeded = report.succeeded,
        failed = report.failed.len(),
        "run complete"
    );
    Ok(report)
}

/// Forget incremental state of every node at or below `path`.
pub fn reset_incremental(cfg: &ConfigFile, path: &NodePath) -> Result<usize> {
    if cfg.config.state_storage_mode == StateStorageMode::Memory {
        warn!("state_storage_mode = memory; nothing persisted to reset");
        return Ok(0);
    }
    let store = FileIncrementalStore::open(&cfg.config.state_dir)?;
    let tracker = IncrementalTracker::new(Box::new(store));
    let removed = tracker.reset(path)?;
    info!(node = %path, removed, "incremental state reset");
    Ok(removed)
}

/// Indented outline of the node tree, one node per line.
pub fn render_tree(graph: &Graph) -> String {
    let mut out = String::new();
    for (depth, node) in graph.walk() {
        let indent = "  ".repeat(depth);
        let id = if node.path.is_root() {
            graph.root_id()
        } else {
            node.path.id()
        };
        let kind = match &node.kind {
            NodeKind::Pipeline(_) => "pipeline".to_string(),
            NodeKind::Task(t) => match &t.generator {
                Some(g) => format!("task, {} commands + {}", t.commands.len(), g.placeholder()),
                None => format!("task, {} commands", t.commands.len()),
            },
        };
        let _ = write!(out, "{indent}{id} ({kind})");
        if !node.upstreams.is_empty() {
            let _ = write!(out, " after [{}]", node.upstreams.join(", "));
        }
        if !node.description.is_empty() {
            let _ = write!(out, ": {}", node.description);
        }
        out.push('\n');
    }
    out
}
