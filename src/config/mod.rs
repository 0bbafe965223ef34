// src/config/mod.rs

//! Configuration loading and validation for rundag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`, `commands.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate the pipeline tree and global settings (`validate.rs`).

pub mod commands;
pub mod loader;
pub mod model;
pub mod validate;

pub use commands::{CommandSpec, GeneratorSpec};
pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{
    ConfigFile, ConfigSection, DatabaseConfig, NodeSpec, PipelineSpec, RawConfigFile, TaskSpec,
};
pub use validate::validate_pipeline_tree;
