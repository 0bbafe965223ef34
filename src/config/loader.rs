// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (ids, dependencies, cycles). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents)
}

/// Parse TOML text into a `RawConfigFile`.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks global settings, the pipeline tree (ids, sibling-only
///   dependencies, cycles, generator placement) and database aliases.
///
/// Relative `base_path`s are resolved against the directory of the config
/// file; the root pipeline defaults to that directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw_config = load_from_path(path)?;
    let root_dir = config_root_dir(path);

    raw_config.pipeline.base_path = Some(match raw_config.pipeline.base_path.take() {
        Some(base) if base.is_relative() => root_dir.join(base),
        Some(base) => base,
        None => root_dir.clone(),
    });
    if raw_config.config.state_dir.is_relative() {
        raw_config.config.state_dir = root_dir.join(&raw_config.config.state_dir);
    }

    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Directory containing the config file.
///
/// A bare filename like `Rundag.toml` (parent = "") maps to the current
/// working directory.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
