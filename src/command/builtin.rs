// src/command/builtin.rs

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::command::shell::{run_shell, shell_quote, StdoutMode};
use crate::command::{BoxFuture, Command, CommandContext, CommandOutcome};
use crate::config::commands::{IncrementalSpec, ReadFileSpec, ShellSpec, SqlSpec, WriteFileSpec};
use crate::errors::RundagError;
use crate::incremental::hash::file_dependency_hash;
use crate::types::Compression;

/// Key under which a command's file-dependency hash is stored.
fn dependency_key(kind: &str, text: &str) -> String {
    let digest = blake3::hash(text.as_bytes()).to_hex();
    format!("{kind}:{}", &digest[..16])
}

/// Run `body` unless the hash over `files` is unchanged since its last
/// successful run.
///
/// The stored hash is deleted before running so that a failed run is
/// retried on the next invocation, and written again only on success.
async fn run_with_file_dependencies<'a, F>(
    ctx: &'a CommandContext,
    files: &'a [String],
    key: &'a str,
    body: F,
) -> Result<CommandOutcome>
where
    F: std::future::Future<Output = Result<CommandOutcome>> + Send + 'a,
{
    if files.is_empty() {
        return body.await;
    }

    let settings = ctx.settings();
    let hash = file_dependency_hash(
        ctx.fs(),
        ctx.base_path(),
        files,
        settings.first_date,
        settings.last_date,
    )?;

    if !ctx.tracker().is_modified(ctx.node_path(), key, &hash)? {
        ctx.output().status("no changes");
        return Ok(CommandOutcome::Succeeded);
    }

    ctx.tracker().delete_dependency(ctx.node_path(), key)?;
    let outcome = body.await?;
    if outcome.is_success() {
        ctx.tracker().update(ctx.node_path(), key, &hash, Utc::now())?;
    }
    Ok(outcome)
}

/// `shell { cmd, file_dependencies }`
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub cmd: String,
    pub file_dependencies: Vec<String>,
}

impl ShellCommand {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            file_dependencies: Vec::new(),
        }
    }

    pub fn from_spec(spec: &ShellSpec) -> Self {
        Self {
            cmd: spec.cmd.clone(),
            file_dependencies: spec.file_dependencies.clone(),
        }
    }
}

impl Command for ShellCommand {
    fn describe(&self) -> String {
        self.cmd.clone()
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            let key = dependency_key("shell", &self.cmd);
            run_with_file_dependencies(ctx, &self.file_dependencies, &key, async {
                Ok(run_shell(ctx, &self.cmd, None, StdoutMode::Stream).await?.outcome)
            })
            .await
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlSource {
    Statement(String),
    File(String),
}

/// `sql { sql_statement | sql_file_name, db_alias, replace, ... }`
///
/// The SQL text is written to the stdin of the database client.
#[derive(Debug, Clone)]
pub struct SqlCommand {
    pub source: SqlSource,
    pub db_alias: Option<String>,
    pub replace: BTreeMap<String, String>,
    pub file_dependencies: Vec<String>,
    pub echo_queries: bool,
}

impl SqlCommand {
    pub fn from_spec(spec: &SqlSpec) -> crate::errors::Result<Self> {
        let source = match (&spec.sql_statement, &spec.sql_file_name) {
            (Some(stmt), None) => SqlSource::Statement(stmt.clone()),
            (None, Some(file)) => SqlSource::File(file.clone()),
            _ => {
                return Err(RundagError::ConfigError(
                    "sql needs exactly one of sql_statement or sql_file_name".to_string(),
                ));
            }
        };
        Ok(Self {
            source,
            db_alias: spec.db_alias.clone(),
            replace: spec.replace.clone(),
            file_dependencies: spec.file_dependencies.clone(),
            echo_queries: spec.echo_queries,
        })
    }

    fn sql_text(&self, ctx: &CommandContext) -> Result<String> {
        let raw = match &self.source {
            SqlSource::Statement(stmt) => stmt.clone(),
            SqlSource::File(file) => {
                let path = ctx.resolve(file);
                ctx.fs()
                    .read_to_string(&path)
                    .with_context(|| format!("reading sql file {:?}", path))?
            }
        };
        Ok(self
            .replace
            .iter()
            .fold(raw, |sql, (from, to)| sql.replace(from.as_str(), to)))
    }

    fn client(&self, ctx: &CommandContext) -> Result<String> {
        let settings = ctx.settings();
        let alias = self.db_alias.as_deref().unwrap_or(&settings.default_db_alias);
        settings
            .databases
            .get(alias)
            .map(|db| db.client.clone())
            .with_context(|| format!("unknown database alias '{alias}'"))
    }

    fn dependency_files(&self) -> Vec<String> {
        let mut files = self.file_dependencies.clone();
        if !files.is_empty() {
            if let SqlSource::File(file) = &self.source {
                files.push(file.clone());
            }
        }
        files
    }
}

impl Command for SqlCommand {
    fn describe(&self) -> String {
        match &self.source {
            SqlSource::Statement(stmt) => stmt.clone(),
            SqlSource::File(file) => format!("sql file {file}"),
        }
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            let key = dependency_key("sql", &self.describe());
            let files = self.dependency_files();
            run_with_file_dependencies(ctx, &files, &key, async {
                let client = self.client(ctx)?;
                let sql = self.sql_text(ctx)?;
                if self.echo_queries {
                    ctx.output().verbatim(sql.clone());
                }
                debug!(node = %ctx.node_path(), client = %client, "executing sql");
                Ok(run_shell(ctx, &client, Some(sql), StdoutMode::Stream).await?.outcome)
            })
            .await
        })
    }
}

/// `read_file { file_name, compression, consumer }`
#[derive(Debug, Clone)]
pub struct ReadFileCommand {
    pub file_name: String,
    pub compression: Compression,
    pub consumer: String,
}

impl ReadFileCommand {
    pub fn from_spec(spec: &ReadFileSpec) -> Self {
        Self {
            file_name: spec.file_name.clone(),
            compression: spec.compression,
            consumer: spec.consumer.clone(),
        }
    }

    fn shell_command(&self, ctx: &CommandContext) -> String {
        let path = ctx.resolve(&self.file_name);
        let reader = self
            .compression
            .read_command(&shell_quote(&path.to_string_lossy()));
        format!("{reader} | {}", self.consumer)
    }
}

impl Command for ReadFileCommand {
    fn describe(&self) -> String {
        format!("read {} into {}", self.file_name, self.consumer)
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            let cmd = self.shell_command(ctx);
            Ok(run_shell(ctx, &cmd, None, StdoutMode::Stream).await?.outcome)
        })
    }
}

/// `write_file { command, file_name }`
#[derive(Debug, Clone)]
pub struct WriteFileCommand {
    pub command: String,
    pub file_name: String,
}

impl WriteFileCommand {
    pub fn from_spec(spec: &WriteFileSpec) -> Self {
        Self {
            command: spec.command.clone(),
            file_name: spec.file_name.clone(),
        }
    }
}

impl Command for WriteFileCommand {
    fn describe(&self) -> String {
        format!("{} > {}", self.command, self.file_name)
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            let path = ctx.resolve(&self.file_name);
            let cmd = format!("{} > {}", self.command, shell_quote(&path.to_string_lossy()));
            Ok(run_shell(ctx, &cmd, None, StdoutMode::Stream).await?.outcome)
        })
    }
}

/// `incremental { key, max_value_command, full_command, incremental_command }`
#[derive(Debug, Clone)]
pub struct IncrementalCommand {
    pub key: String,
    pub max_value_command: String,
    pub full_command: String,
    pub incremental_command: String,
}

impl IncrementalCommand {
    pub fn from_spec(spec: &IncrementalSpec) -> Self {
        Self {
            key: spec.key.clone(),
            max_value_command: spec.max_value_command.clone(),
            full_command: spec.full_command.clone(),
            incremental_command: spec.incremental_command.clone(),
        }
    }
}

impl Command for IncrementalCommand {
    fn describe(&self) -> String {
        format!("incremental load of '{}'", self.key)
    }

    fn execute<'a>(&'a self, ctx: &'a CommandContext) -> BoxFuture<'a, Result<CommandOutcome>> {
        Box::pin(async move {
            let max_run = run_shell(ctx, &self.max_value_command, None, StdoutMode::Capture).await?;
            if !max_run.outcome.is_success() {
                ctx.output().error("could not determine max comparison value");
                return Ok(max_run.outcome);
            }

            let max_value = max_run
                .stdout
                .iter()
                .map(|l| l.trim())
                .rfind(|l| !l.is_empty())
                .map(str::to_string);
            let Some(max_value) = max_value else {
                ctx.output().status("source is empty; nothing to load");
                return Ok(CommandOutcome::Succeeded);
            };

            let last_value = ctx.tracker().last_comparison_value(ctx.node_path(), &self.key)?;
            let cmd = match &last_value {
                Some(last) if *last == max_value => {
                    ctx.output().status(format!("no changes since {last}"));
                    return Ok(CommandOutcome::Succeeded);
                }
                Some(last) => {
                    ctx.output().status(format!("loading changes since {last}"));
                    self.incremental_command.replace("{last_value}", last)
                }
                None => {
                    ctx.output().status("no comparison value stored; full load");
                    self.full_command.clone()
                }
            };

            let outcome = run_shell(ctx, &cmd, None, StdoutMode::Stream).await?.outcome;
            if outcome.is_success() {
                ctx.tracker()
                    .set_last_comparison_value(ctx.node_path(), &self.key, &max_value)?;
            }
            Ok(outcome)
        })
    }
}
