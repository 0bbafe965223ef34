// src/command/internal.rs

//! Bookkeeping commands appended to generated tasks.
//!
//! They write incremental state on behalf of the *generating* task, so they
//! carry that task's path instead of using the context path.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::command::{BoxFuture, Command, CommandContext, CommandOutcome};
use crate::types::NodePath;

/// Store the hash of a generator's `file_dependencies` after all generated
/// work succeeded.
#[derive(Debug, Clone)]
pub struct UpdateFileDependencies {
    pub owner: NodePath,
    pub key: String,
    pub hash: String,
}

impl Command for UpdateFileDependencies {
    fn describe(&self) -> String {
        format!("update file dependencies of {}", self.owner)
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            ctx.tracker()
                .update(&self.owner, &self.key, &self.hash, Utc::now())?;
            Ok(CommandOutcome::Succeeded)
        })
    }
}

/// Mark a file as consumed by a `parallel_files` generator.
#[derive(Debug, Clone)]
pub struct TrackProcessedFile {
    pub owner: NodePath,
    pub file_name: PathBuf,
    pub modified: DateTime<Utc>,
}

impl Command for TrackProcessedFile {
    fn describe(&self) -> String {
        format!("track {} as processed", self.file_name.display())
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            ctx.tracker().track_processed_file(
                &self.owner,
                &self.file_name.to_string_lossy(),
                self.modified,
            )?;
            Ok(CommandOutcome::Succeeded)
        })
    }
}
