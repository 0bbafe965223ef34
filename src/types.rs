// src/types.rs

//! Small shared value types: node addressing and config-level enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered sequence of ids from the root pipeline to a node.
///
/// The root pipeline itself has the empty path. Paths are the globally
/// unique address of a node: they key events, run history and incremental
/// state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// The path of the root pipeline.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Last id of the path (empty for the root).
    pub fn id(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn child(&self, id: &str) -> Self {
        let mut ids = self.0.clone();
        ids.push(id.to_string());
        Self(ids)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// True if `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0.join("/"))
        }
    }
}

impl FromStr for NodePath {
    type Err = String;

    /// Parse `a/b/c` (leading/trailing slashes ignored; `""` and `/` are the root).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids: Vec<String> = s
            .trim()
            .split('/')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self(ids))
    }
}

/// How an `Output` message should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Regular line of text.
    #[default]
    Text,
    /// Preformatted output (command stdout/stderr, tracebacks).
    Verbatim,
    /// Status line from the engine itself.
    Italics,
}

/// Where persistent state (run history, incremental state) is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateStorageMode {
    /// Store state below `[config].state_dir`.
    #[default]
    File,
    /// Keep state in memory only (lost when the process exits).
    Memory,
}

/// Which files a `parallel_files` generator picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Every matching file, every run.
    #[default]
    All,
    /// Only the most recent matching file.
    OnlyLatest,
    /// Files that were not processed in a previous run.
    OnlyNew,
    /// New files plus files whose modification time increased.
    OnlyChanged,
    /// Like `OnlyNew`, but leave the most recent file for a later run.
    OnlyNewExceptLatest,
}

/// Compression of a file consumed by a `read_file` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
    Xz,
    Zip,
}

impl Compression {
    /// Shell command that writes the decompressed file to stdout.
    pub fn read_command(&self, quoted_file: &str) -> String {
        match self {
            Compression::None => format!("cat {quoted_file}"),
            Compression::Gzip => format!("gunzip -d -c {quoted_file}"),
            Compression::Bzip2 => format!("bzip2 -d -c {quoted_file}"),
            Compression::Xz => format!("xz -d -c {quoted_file}"),
            Compression::Zip => format!("unzip -p {quoted_file}"),
        }
    }
}
