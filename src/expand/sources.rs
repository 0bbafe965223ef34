// src/expand/sources.rs

//! Item enumeration for each generator kind.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use globset::Glob;
use regex::Regex;
use tracing::debug;

use crate::command::shell::{run_shell, StdoutMode};
use crate::command::{Command, CommandContext, ExecutionEnv, TrackProcessedFile};
use crate::config::commands::{
    GeneratorSpec, ParallelDatesSpec, ParallelFilesSpec, ParallelValuesSpec,
};
use crate::expand::{ExpansionRequest, LaunchError};
use crate::incremental::hash::file_dependency_hash;
use crate::types::ReadMode;

/// One unit of generated work.
#[derive(Debug)]
pub struct Item {
    /// Source of the generated id and description.
    pub key: String,
    /// Substituted for the placeholder in command templates.
    pub value: String,
    /// Commands appended after the instantiated templates.
    pub extra: Vec<Arc<dyn Command>>,
}

#[derive(Debug, Default)]
pub struct Enumeration {
    pub items: Vec<Item>,
    /// `(key, hash)` to store once all generated work succeeded.
    pub file_dependencies: Option<(String, String)>,
}

pub async fn enumerate(
    request: &ExpansionRequest,
    env: &Arc<ExecutionEnv>,
) -> Result<Enumeration, LaunchError> {
    let ctx = CommandContext::new(Arc::clone(env), request.path.clone(), request.base_path.clone());
    match &request.generator {
        GeneratorSpec::Values(spec) => enumerate_values(spec, &ctx).await,
        GeneratorSpec::Dates(spec) => Ok(enumerate_dates(spec, &ctx)),
        GeneratorSpec::Files(spec) => enumerate_files(spec, &ctx),
    }
}

fn plain_items(values: Vec<String>) -> Vec<Item> {
    values
        .into_iter()
        .map(|value| Item {
            key: value.clone(),
            value,
            extra: Vec::new(),
        })
        .collect()
}

async fn enumerate_values(
    spec: &ParallelValuesSpec,
    ctx: &CommandContext,
) -> Result<Enumeration, LaunchError> {
    let mut values = spec.values.clone();

    if let Some(cmd) = &spec.values_command {
        let result = run_shell(ctx, cmd, None, StdoutMode::Capture)
            .await
            .map_err(|e| LaunchError::new(format!("running values_command: {e:#}")))?;
        if !result.outcome.is_success() {
            return Err(LaunchError::new(format!("values_command failed: {cmd}")));
        }
        values.extend(
            result
                .stdout
                .into_iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
        );
    }

    Ok(Enumeration {
        items: plain_items(values),
        file_dependencies: None,
    })
}

/// Every day in `[start, end]`, clamped into `[first_date, last_date]`.
pub fn date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    first_date: NaiveDate,
    last_date: NaiveDate,
) -> Vec<NaiveDate> {
    let start = start.unwrap_or(first_date).max(first_date);
    let end = end.unwrap_or_else(|| Utc::now().date_naive()).min(last_date);

    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        days.push(day);
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

fn enumerate_dates(spec: &ParallelDatesSpec, ctx: &CommandContext) -> Enumeration {
    let settings = ctx.settings();
    let values = date_range(spec.start, spec.end, settings.first_date, settings.last_date)
        .into_iter()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect();
    Enumeration {
        items: plain_items(values),
        file_dependencies: None,
    }
}

#[derive(Debug)]
struct Candidate {
    relative: PathBuf,
    date: Option<NaiveDate>,
}

fn enumerate_files(
    spec: &ParallelFilesSpec,
    ctx: &CommandContext,
) -> Result<Enumeration, LaunchError> {
    let matcher = Glob::new(&spec.file_pattern)
        .map_err(|e| {
            LaunchError::new(format!("invalid file_pattern '{}': {e}", spec.file_pattern))
        })?
        .compile_matcher();
    let date_regex = spec
        .date_regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| LaunchError::new(format!("invalid date_regex: {e}")))?;

    let fs = ctx.fs();
    let base = ctx.base_path();
    if !fs.is_dir(base) {
        return Err(LaunchError::new(format!("base path {:?} is not a directory", base)));
    }
    let files = fs
        .walk_files(base)
        .map_err(|e| LaunchError::new(format!("listing files below {:?}: {e:#}", base)))?;

    let first_date = ctx.settings().first_date;
    let mut candidates = Vec::new();
    for relative in files.into_iter().filter(|f| matcher.is_match(f)) {
        let date = match &date_regex {
            Some(regex) => {
                let date = parse_file_date(regex, &relative.to_string_lossy()).ok_or_else(|| {
                    LaunchError::new(format!(
                        "file {:?} does not match date_regex with year, month and day groups",
                        relative
                    ))
                })?;
                if date < first_date {
                    continue;
                }
                Some(date)
            }
            None => None,
        };
        candidates.push(Candidate { relative, date });
    }

    // Newest first.
    candidates.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.relative.cmp(&a.relative)));

    let node = ctx.node_path();
    let settings = ctx.settings();
    let file_dependencies = if spec.file_dependencies.is_empty() {
        None
    } else {
        let hash = file_dependency_hash(
            fs,
            base,
            &spec.file_dependencies,
            settings.first_date,
            settings.last_date,
        )
        .map_err(|e| LaunchError::new(format!("hashing file dependencies: {e:#}")))?;
        Some((format!("parallel_files:{}", spec.file_pattern), hash))
    };

    let dependencies_changed = match &file_dependencies {
        Some((key, hash)) => {
            let changed = ctx
                .tracker()
                .is_modified(node, key, hash)
                .map_err(|e| LaunchError::new(e.to_string()))?;
            if changed {
                ctx.output().status("file dependencies changed; reading all files");
            }
            changed
        }
        None => false,
    };

    let selected: Vec<Candidate> = if spec.read_mode == ReadMode::All || dependencies_changed {
        candidates
    } else {
        let processed = ctx
            .tracker()
            .processed_files(node)
            .map_err(|e| LaunchError::new(e.to_string()))?;
        let is_new = |c: &Candidate| !processed.contains_key(c.relative.to_string_lossy().as_ref());

        match spec.read_mode {
            ReadMode::All => candidates,
            ReadMode::OnlyLatest => candidates.into_iter().take(1).collect(),
            ReadMode::OnlyNew => candidates.into_iter().filter(|c| is_new(c)).collect(),
            ReadMode::OnlyNewExceptLatest => {
                candidates.into_iter().skip(1).filter(|c| is_new(c)).collect()
            }
            ReadMode::OnlyChanged => {
                let mut changed = Vec::new();
                for c in candidates {
                    let name = c.relative.to_string_lossy().to_string();
                    match processed.get(&name) {
                        None => changed.push(c),
                        Some(seen) => {
                            let modified = fs
                                .modified(&base.join(&c.relative))
                                .map_err(|e| LaunchError::new(format!("{e:#}")))?;
                            if modified > *seen {
                                changed.push(c);
                            }
                        }
                    }
                }
                changed
            }
        }
    };

    let track = spec.read_mode != ReadMode::All;
    let mut items = Vec::with_capacity(selected.len());
    for c in selected {
        let value = c.relative.to_string_lossy().to_string();
        let mut extra: Vec<Arc<dyn Command>> = Vec::new();
        if track {
            let modified = fs
                .modified(&base.join(&c.relative))
                .map_err(|e| LaunchError::new(format!("{e:#}")))?;
            extra.push(Arc::new(TrackProcessedFile {
                owner: node.clone(),
                file_name: c.relative.clone(),
                modified,
            }));
        }
        items.push(Item {
            key: value.clone(),
            value,
            extra,
        });
    }
    debug!(node = %node, files = items.len(), read_mode = ?spec.read_mode, "selected files");

    let file_dependencies = if track { file_dependencies } else { None };
    Ok(Enumeration {
        items,
        file_dependencies,
    })
}

/// Date from the first three capture groups (year, month, day).
pub fn parse_file_date(regex: &Regex, name: &str) -> Option<NaiveDate> {
    let caps = regex.captures(name)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
