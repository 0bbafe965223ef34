// src/exec/mod.rs

//! Task execution layer.
//!
//! This module is responsible for actually running the commands of a task
//! attempt and reporting back to the orchestration runtime via
//! `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the main executor loop which tracks running
//!   attempts and forwards stop requests to them.
//! - [`task_runner`] runs the commands of one attempt, in order.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{spawn_executor, ExecutorRequest};
