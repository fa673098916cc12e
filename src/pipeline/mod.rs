//! Pipeline stage adapter.
//!
//! A [`Pipeline`] reads source files selected by glob patterns into virtual
//! [`Asset`]s, threads them through an ordered list of [`Stage`]s and reports
//! the files written by [`Dest`] stages. Stages compose like a stream chain in
//! an asset build: compile → write → minify → rename → write.
//!
//! A pipeline is an [`Action`], so it can be registered as a leaf task. Any
//! stage error, I/O error or panic resolves to [`PipelineResult::Failure`].

pub mod discovery;

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::task::{Action, PipelineResult, StageError};

pub use discovery::*;

/// A virtual file flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Path relative to the glob base (and later to the destination)
    pub path: PathBuf,
    /// Absolute path of the file this asset was read from
    pub source: Option<PathBuf>,
    /// File contents (empty when the pipeline does not read sources)
    pub contents: Vec<u8>,
}

impl Asset {
    /// Create an in-memory asset.
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self { path: path.into(), source: None, contents: contents.into() }
    }

    /// Set the source path.
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Contents as UTF-8 text.
    pub fn text(&self, stage: &str) -> Result<&str, StageError> {
        std::str::from_utf8(&self.contents).map_err(|e| {
            StageError::new(stage, format!("not valid UTF-8: {}", e)).in_file(self.origin())
        })
    }

    /// The best path to show in diagnostics.
    pub fn origin(&self) -> PathBuf {
        self.source.clone().unwrap_or_else(|| self.path.clone())
    }

    /// Replace the extension of the relative path.
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.path.set_extension(ext);
        self
    }
}

/// Per-run state shared by the stages of one pipeline execution.
#[derive(Debug)]
pub struct StageContext {
    root: PathBuf,
    written: Vec<PathBuf>,
}

impl StageContext {
    /// Create a context rooted at the project directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), written: vec![] }
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Record a file written by a stage.
    pub fn record_output(&mut self, path: PathBuf) {
        self.written.push(path);
    }

    /// Files written so far.
    pub fn outputs(&self) -> &[PathBuf] {
        &self.written
    }

    fn into_outputs(self) -> Vec<PathBuf> {
        self.written
    }
}

/// One transformation step over a set of assets.
pub trait Stage: Send + Sync {
    /// Stage name used in diagnostics.
    fn name(&self) -> &str;

    /// Transform the assets. Returning an error fails the whole pipeline.
    fn apply(&self, assets: Vec<Asset>, ctx: &mut StageContext) -> Result<Vec<Asset>, StageError>;
}

/// Write assets below a directory, passing them on unchanged.
#[derive(Debug, Clone)]
pub struct Dest {
    dir: PathBuf,
}

impl Dest {
    /// Create a destination stage for a project-relative directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Stage for Dest {
    fn name(&self) -> &str {
        "dest"
    }

    fn apply(&self, assets: Vec<Asset>, ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        let dir = ctx.resolve(&self.dir);
        for asset in &assets {
            let target = dir.join(&asset.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    StageError::new("dest", format!("Failed to create output directory: {}", e))
                        .in_file(parent)
                })?;
            }
            fs::write(&target, &asset.contents).map_err(|e| {
                StageError::new("dest", format!("Failed to write: {}", e)).in_file(&target)
            })?;
            ctx.record_output(target);
        }
        Ok(assets)
    }
}

/// Replace the full extension of every asset (`style.css` → `style.min.css`).
#[derive(Debug, Clone)]
pub struct Rename {
    extname: String,
}

impl Rename {
    /// Create a rename stage; `extname` includes the leading dot.
    pub fn extname(extname: impl Into<String>) -> Self {
        Self { extname: extname.into() }
    }
}

impl Stage for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn apply(&self, assets: Vec<Asset>, _ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        Ok(assets
            .into_iter()
            .map(|mut asset| {
                let stem = asset
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                asset.path.set_file_name(format!("{}{}", stem, self.extname));
                asset
            })
            .collect())
    }
}

/// Source selection for a pipeline.
#[derive(Debug, Clone)]
pub struct Sources {
    patterns: Vec<String>,
    read: bool,
}

impl Sources {
    /// Select files matching the given project-relative globs.
    pub fn glob<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { patterns: patterns.into_iter().map(Into::into).collect(), read: true }
    }

    /// Don't read file contents (stages only need paths).
    pub fn without_contents(mut self) -> Self {
        self.read = false;
        self
    }

    /// The glob patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    fn load(&self, root: &Path) -> Result<Vec<Asset>, StageError> {
        let mut assets = Vec::new();
        for pattern in &self.patterns {
            let base = root.join(glob_base(pattern));
            let files = discover_files(root, pattern)
                .map_err(|e| StageError::new("src", e.to_string()))?;
            for file in files {
                let contents = if self.read {
                    fs::read(&file).map_err(|e| {
                        StageError::new("src", format!("Failed to read: {}", e)).in_file(&file)
                    })?
                } else {
                    vec![]
                };
                let path = relative_to(&file, &base);
                assets.push(Asset { path, source: Some(file), contents });
            }
        }
        Ok(assets)
    }
}

/// A source → stages pipeline, runnable as a leaf task.
pub struct Pipeline {
    name: String,
    root: PathBuf,
    sources: Sources,
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("sources", &self.sources)
            .field("stages", &stages)
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline reading `sources` relative to `root`.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, sources: Sources) -> Self {
        Self { name: name.into(), root: root.into(), sources, stages: vec![] }
    }

    /// Append a stage.
    pub fn pipe(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append a destination stage.
    pub fn dest(self, dir: impl Into<PathBuf>) -> Self {
        self.pipe(Dest::new(dir))
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every stage and return the written files.
    pub fn execute(&self) -> Result<Vec<PathBuf>, StageError> {
        let mut ctx = StageContext::new(&self.root);
        let mut assets = self.sources.load(&self.root)?;
        tracing::debug!(pipeline = %self.name, assets = assets.len(), "sources loaded");

        for stage in &self.stages {
            assets = stage.apply(assets, &mut ctx)?;
        }

        Ok(ctx.into_outputs())
    }
}

impl Action for Pipeline {
    fn run(&self) -> PipelineResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute())) {
            Ok(result) => result.into(),
            Err(_) => PipelineResult::Failure(StageError::new(
                self.name.as_str(),
                "a stage panicked while transforming its inputs",
            )),
        }
    }
}
