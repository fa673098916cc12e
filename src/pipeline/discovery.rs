//! Source file discovery.
//!
//! Resolves glob patterns relative to a root directory, and computes the
//! glob base (the directory part before the first wildcard) that output
//! paths are made relative to.

use glob::glob;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Error during source discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    #[error("Invalid glob pattern '{0}': {1}")]
    InvalidPattern(String, glob::PatternError),
    /// IO error during file enumeration
    #[error("IO error during discovery: {0}")]
    Io(#[from] std::io::Error),
}

/// Discover files matching a glob pattern.
///
/// # Arguments
/// - `root` - Directory to resolve relative patterns from
/// - `pattern` - Glob pattern to match
///
/// # Returns
/// Sorted list of matching regular files.
pub fn discover_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    let full_pattern = root.join(pattern);
    let pattern_str = full_pattern.to_string_lossy();

    let paths =
        glob(&pattern_str).map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if path.is_file() {
                    files.push(path);
                }
            }
            Err(e) => {
                tracing::warn!("error reading path during discovery: {}", e);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Directory part of a glob pattern before its first wildcard component.
///
/// A pattern without wildcards is a single file; its base is the parent.
///
/// ```ignore
/// assert_eq!(glob_base("src/pug/pages/**/*.pug"), PathBuf::from("src/pug/pages"));
/// assert_eq!(glob_base("src/scss/style.scss"), PathBuf::from("src/scss"));
/// ```
pub fn glob_base(pattern: &str) -> PathBuf {
    let path = Path::new(pattern);
    let mut base = PathBuf::new();
    let mut wildcard = false;

    for component in path.components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            wildcard = true;
            break;
        }
        base.push(component);
    }

    if wildcard {
        base
    } else {
        base.parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

/// Make `path` relative to `base`, falling back to the file name.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf()),
    }
}

/// Normalize `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
