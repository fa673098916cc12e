//! Build context containing configuration and paths for a run.

use crate::config::FlowConfig;
use std::path::{Path, PathBuf};

/// Build context containing configuration and paths for a build operation.
///
/// Source patterns from the config are relative to the source directory;
/// destinations are relative to the output directory. Both are resolved
/// against the project root (where assetflow.toml is located).
#[derive(Debug, Clone)]
pub struct BuildContext {
    config: FlowConfig,
    project_root: PathBuf,
    verbose: bool,
}

impl BuildContext {
    /// Create a new build context.
    pub fn new(config: FlowConfig, project_root: PathBuf) -> Self {
        Self { config, project_root, verbose: false }
    }

    /// Get the configuration.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Get the source directory (resolved to absolute path).
    pub fn src_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.src)
    }

    /// Get the output directory (resolved to absolute path).
    pub fn out_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.out)
    }

    /// Whether verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Resolve a path relative to the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        crate::config::resolve_path(&self.project_root, path)
    }

    /// A source pattern as a project-relative glob (`scss/*.scss` → `src/scss/*.scss`).
    pub fn src_pattern(&self, pattern: &str) -> String {
        join_pattern(&self.config.project.src, pattern)
    }

    /// An output pattern as a project-relative glob (`**/*.html` → `public/**/*.html`).
    pub fn out_pattern(&self, pattern: &str) -> String {
        join_pattern(&self.config.project.out, pattern)
    }

    /// A destination directory relative to the project root.
    pub fn out_path(&self, dir: &Path) -> PathBuf {
        self.config.project.out.join(dir)
    }

    /// A source directory relative to the project root.
    pub fn src_path(&self, dir: &Path) -> PathBuf {
        self.config.project.src.join(dir)
    }
}

fn join_pattern(dir: &Path, pattern: &str) -> String {
    let dir = dir.to_string_lossy();
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() || dir == "." {
        pattern.to_string()
    } else {
        format!("{}/{}", dir, pattern)
    }
}
