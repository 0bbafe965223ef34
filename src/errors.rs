// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RundagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid node id: {0}")]
    InvalidId(String),

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Misplaced generator command: {0}")]
    GeneratorPlacement(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("event bus is closed")]
    EventBusClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RundagError {
    /// Whether this error means the pipeline definition (or the requested
    /// selection) is invalid, so no run was started.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RundagError::ConfigError(_)
                | RundagError::InvalidId(_)
                | RundagError::DuplicateNode(_)
                | RundagError::UnknownDependency(_)
                | RundagError::DagCycle(_)
                | RundagError::GeneratorPlacement(_)
                | RundagError::UnknownFunction(_)
                | RundagError::NodeNotFound(_)
                | RundagError::TomlError(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RundagError>;
