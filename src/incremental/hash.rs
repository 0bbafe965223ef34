// src/incremental/hash.rs

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use chrono::NaiveDate;
use tracing::debug;

use crate::fs::FileSystem;

/// Compute the hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute a deterministic hash over the contents of the given files.
///
/// Order of `paths` does not matter; they are sorted before hashing. Paths
/// that do not exist contribute their name only, so creating a missing
/// dependency still changes the hash.
pub fn compute_hash_for_paths<I, P>(fs: &dyn FileSystem, paths: I) -> Result<String>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut hasher = Hasher::new();

    let mut paths_vec: Vec<PathBuf> = paths
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .collect();
    paths_vec.sort();

    for path in paths_vec {
        hasher.update(path.to_string_lossy().as_bytes());
        if fs.is_file(&path) {
            debug!("hashing file {:?}", path);
            let file_hash = compute_file_hash(fs, &path)?;
            hasher.update(file_hash.as_bytes());
        }
    }

    let hash = hasher.finalize().to_hex().to_string();
    debug!(hash = %hash, "computed aggregate hash");
    Ok(hash)
}

/// Hash used for `file_dependencies`.
///
/// The configured date range is part of the hash so that changing
/// `first_date` / `last_date` invalidates stored state.
pub fn file_dependency_hash(
    fs: &dyn FileSystem,
    base_path: &Path,
    files: &[String],
    first_date: NaiveDate,
    last_date: NaiveDate,
) -> Result<String> {
    let content_hash = compute_hash_for_paths(fs, files.iter().map(|f| base_path.join(f)))?;

    let mut hasher = Hasher::new();
    hasher.update(format!("{first_date} {last_date}").as_bytes());
    hasher.update(content_hash.as_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}
