// src/command/shell.rs

//! OS process plumbing shared by all shell-based commands.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as Process;
use tracing::{debug, info};

use crate::command::{CommandContext, CommandOutcome};
use crate::types::NodePath;

/// The process of a shell-based command could not be started.
#[derive(Debug, Error)]
#[error("could not start '{program}' for node '{node}': {source}")]
pub struct SpawnError {
    pub program: String,
    pub node: NodePath,
    #[source]
    pub source: std::io::Error,
}

/// What to do with the stdout of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutMode {
    /// Forward every line as a verbatim `Output` event.
    Stream,
    /// Collect the lines and return them.
    Capture,
}

#[derive(Debug)]
pub struct ShellResult {
    pub outcome: CommandOutcome,
    /// Only filled in [`StdoutMode::Capture`].
    pub stdout: Vec<String>,
}

/// Quote a string for use as a single shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Run `cmd` through the configured bash command.
///
/// - The working directory is the node's base path (when it exists).
/// - stderr lines are always forwarded as error output.
/// - `stdin`, when given, is written to the process and the pipe closed.
/// - The child is killed when the returned future is dropped.
pub async fn run_shell(
    ctx: &CommandContext,
    cmd: &str,
    stdin: Option<String>,
    mode: StdoutMode,
) -> Result<ShellResult> {
    let mut words = ctx.settings().bash_command.split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| anyhow!("bash_command is empty"))?;

    let mut process = Process::new(program);
    process.args(words).arg("-c").arg(cmd);
    if ctx.base_path().is_dir() {
        process.current_dir(ctx.base_path());
    }

    process
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(node = %ctx.node_path(), cmd, "spawning shell process");

    let mut child = process.spawn().map_err(|source| SpawnError {
        program: program.to_string(),
        node: ctx.node_path().clone(),
        source,
    })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                debug!(error = %e, "writing to process stdin failed");
            }
            // Dropping the pipe closes stdin.
        });
    }

    let stderr_task = child.stderr.take().map(|stderr| {
        let output = ctx.output().clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Ok(Some(line)) = next_line_lossy(&mut reader, &mut buf).await {
                output.error_verbatim(line);
            }
        })
    });

    let mut captured = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = next_line_lossy(&mut reader, &mut buf)
            .await
            .with_context(|| format!("reading stdout of node '{}'", ctx.node_path()))?
        {
            match mode {
                StdoutMode::Stream => ctx.output().verbatim(line),
                StdoutMode::Capture => captured.push(line),
            }
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of node '{}'", ctx.node_path()))?;

    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    let code = status.code();
    info!(
        node = %ctx.node_path(),
        exit_code = code.unwrap_or(-1),
        success = status.success(),
        "process exited"
    );

    let outcome = if status.success() {
        CommandOutcome::Succeeded
    } else {
        CommandOutcome::Failed { exit_code: code }
    };

    Ok(ShellResult {
        outcome,
        stdout: captured,
    })
}

/// Next line of `reader` without its line ending. Invalid UTF-8 is replaced.
async fn next_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}
