//! Watch mode: re-run bound tasks when source files change.
//!
//! A [`WatchBinding`] ties glob patterns (relative to the project root) to a
//! task id and an optional hook. [`FileWatcher::run`] establishes a debounced
//! recursive watch and feeds every batch of changed paths to
//! [`FileWatcher::dispatch`], which is also the entry point for tests.
//!
//! Created, modified and deleted files all count as changes. Each matching
//! binding runs its task once per batch; the hook runs only after the task
//! succeeded.

use glob::{MatchOptions, Pattern};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;

use crate::config::WatchConfig;
use crate::task::progress::ProgressEvent;
use crate::task::{TaskReport, TaskRunner};

/// Error during watch mode
#[derive(Debug, Error)]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch path: {0}")]
    WatchPath(notify::Error),
    /// Channel receive error
    #[error("Watch channel error: {0}")]
    Channel(String),
    /// Watched directory not found
    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    /// Invalid binding pattern
    #[error("Invalid watch pattern '{0}': {1}")]
    InvalidPattern(String, glob::PatternError),
}

/// Callback invoked with the report of a successful run.
pub type Hook = Arc<dyn Fn(&TaskReport) + Send + Sync>;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// File-change patterns bound to a task.
#[derive(Clone)]
pub struct WatchBinding {
    patterns: Vec<Pattern>,
    task_id: String,
    hook: Option<Hook>,
}

impl std::fmt::Debug for WatchBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<&str> = self.patterns.iter().map(Pattern::as_str).collect();
        f.debug_struct("WatchBinding")
            .field("patterns", &patterns)
            .field("task_id", &self.task_id)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl WatchBinding {
    /// Bind project-relative glob patterns to a task.
    pub fn new<I, S>(patterns: I, task_id: impl Into<String>) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Pattern::new(p).map_err(|e| WatchError::InvalidPattern(p.to_string(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, task_id: task_id.into(), hook: None })
    }

    /// Run `hook` after each successful run of the task.
    pub fn with_hook(mut self, hook: impl Fn(&TaskReport) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Bound task id.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Run the hook if `report` is a success.
    pub fn after_run(&self, report: &TaskReport) {
        if let (true, Some(hook)) = (report.is_success(), &self.hook) {
            hook(report);
        }
    }

    /// Whether a project-relative path matches any pattern.
    pub fn matches(&self, path: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path_with(path, MATCH_OPTIONS))
    }
}

type Bindings = Mutex<Vec<(u64, WatchBinding)>>;

fn lock(bindings: &Bindings) -> MutexGuard<'_, Vec<(u64, WatchBinding)>> {
    bindings.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle for removing a binding.
#[derive(Debug)]
pub struct WatchHandle {
    id: u64,
    bindings: Weak<Bindings>,
}

impl WatchHandle {
    /// Remove the binding. Returns false if it was already gone.
    pub fn cancel(self) -> bool {
        let Some(bindings) = self.bindings.upgrade() else {
            return false;
        };
        let mut bindings = lock(&bindings);
        let before = bindings.len();
        bindings.retain(|(id, _)| *id != self.id);
        bindings.len() != before
    }
}

/// Tracks failing tasks across watch runs for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    failing: HashSet<String>,
}

impl ErrorTracker {
    /// Create a new error tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run; returns leaf tasks that failed before and succeeded now.
    pub fn update(&mut self, report: &TaskReport) -> Vec<String> {
        let mut ran = Vec::new();
        collect_leaves(report, &mut ran);

        let mut recovered = Vec::new();
        for (id, success) in ran {
            if success {
                if self.failing.remove(id) {
                    recovered.push(id.to_string());
                }
            } else {
                self.failing.insert(id.to_string());
            }
        }
        recovered
    }

    /// Check if there are any tracked failures
    pub fn has_errors(&self) -> bool {
        !self.failing.is_empty()
    }

    /// Get the number of failing tasks
    pub fn error_count(&self) -> usize {
        self.failing.len()
    }
}

fn collect_leaves<'a>(report: &'a TaskReport, out: &mut Vec<(&'a str, bool)>) {
    if report.is_leaf() {
        out.push((report.task_id.as_str(), report.is_success()));
    }
    for child in &report.children {
        collect_leaves(child, out);
    }
}

/// Clear the terminal screen
fn clear_screen() {
    print!("\x1B[2J\x1B[1;1H");
}

/// Dispatches file changes to bound tasks.
pub struct FileWatcher {
    root: PathBuf,
    canonical_root: PathBuf,
    runner: Arc<TaskRunner>,
    config: WatchConfig,
    bindings: Arc<Bindings>,
    next_id: AtomicU64,
    tracker: Mutex<ErrorTracker>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .field("bindings", &lock(&self.bindings).len())
            .finish()
    }
}

impl FileWatcher {
    /// Create a watcher for a project root.
    pub fn new(root: impl Into<PathBuf>, runner: Arc<TaskRunner>, config: WatchConfig) -> Self {
        let root = root.into();
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
            runner,
            config,
            bindings: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            tracker: Mutex::new(ErrorTracker::new()),
        }
    }

    /// Register a binding. Only changes observed afterwards trigger it.
    pub fn watch(&self, binding: WatchBinding) -> WatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(task = binding.task_id(), id, "watch binding registered");
        lock(&self.bindings).push((id, binding));
        WatchHandle { id, bindings: Arc::downgrade(&self.bindings) }
    }

    /// Number of registered bindings.
    pub fn binding_count(&self) -> usize {
        lock(&self.bindings).len()
    }

    fn relative(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            return path.to_path_buf();
        }
        path.strip_prefix(&self.root)
            .or_else(|_| path.strip_prefix(&self.canonical_root))
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Run every binding matching at least one changed path, once each.
    ///
    /// Paths may be absolute (below the root) or project-relative.
    pub fn dispatch(&self, paths: &[PathBuf]) -> Vec<TaskReport> {
        let relative: Vec<PathBuf> = paths.iter().map(|p| self.relative(p)).collect();
        let bindings: Vec<WatchBinding> = lock(&self.bindings)
            .iter()
            .filter(|(_, b)| relative.iter().any(|p| b.matches(p)))
            .map(|(_, b)| b.clone())
            .collect();

        let mut reports = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let report = match self.runner.run(binding.task_id()) {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(task = binding.task_id(), error = %e, "cannot run bound task");
                    continue;
                }
            };

            let recovered = self.tracker.lock().unwrap_or_else(|e| e.into_inner()).update(&report);
            for task_id in recovered {
                self.runner.reporter().report(ProgressEvent::Recovered { task_id });
            }

            binding.after_run(&report);
            reports.push(report);
        }
        reports
    }

    /// Watch `dirs` recursively and dispatch debounced batches forever.
    ///
    /// Returns only when the watch cannot be established or the event
    /// channel closes.
    pub fn run(&self, dirs: &[PathBuf]) -> Result<(), WatchError> {
        for dir in dirs {
            if !dir.exists() {
                return Err(WatchError::SourceNotFound(dir.clone()));
            }
        }

        let (tx, rx) = channel();
        let debounce = Duration::from_millis(self.config.debounce_ms as u64);
        let mut debouncer = new_debouncer(debounce, tx).map_err(WatchError::WatcherInit)?;
        for dir in dirs {
            debouncer.watcher().watch(dir, RecursiveMode::Recursive).map_err(WatchError::WatchPath)?;
        }

        let reporter = self.runner.reporter();
        let watched: Vec<String> = dirs.iter().map(|d| self.relative(d).display().to_string()).collect();
        reporter.report(ProgressEvent::Info { message: format!("Watching {}", watched.join(", ")) });

        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    let changed: BTreeSet<PathBuf> = events
                        .into_iter()
                        .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                        .map(|e| e.path)
                        .collect();
                    if changed.is_empty() {
                        continue;
                    }

                    if self.config.clear_screen {
                        clear_screen();
                    }
                    for path in &changed {
                        reporter.report(ProgressEvent::Info {
                            message: format!("Changed: {}", self.relative(path).display()),
                        });
                    }

                    let changed: Vec<PathBuf> = changed.into_iter().collect();
                    self.dispatch(&changed);
                }
                Ok(Err(error)) => {
                    tracing::warn!("watch error: {:?}", error);
                }
                Err(e) => return Err(WatchError::Channel(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PipelineResult, StageError, Task, TaskRegistry};
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        watcher: FileWatcher,
        styles: Arc<AtomicUsize>,
        scripts: Arc<AtomicUsize>,
        fail_scripts: Arc<AtomicBool>,
    }

    fn counter_task(id: &str, count: &Arc<AtomicUsize>, fail: Option<Arc<AtomicBool>>) -> Task {
        let count = Arc::clone(count);
        let name = id.to_string();
        Task::leaf(id, move || {
            count.fetch_add(1, Ordering::SeqCst);
            match &fail {
                Some(flag) if flag.load(Ordering::SeqCst) => {
                    PipelineResult::Failure(StageError::new(name.as_str(), "syntax error"))
                }
                _ => PipelineResult::Success(vec![]),
            }
        })
    }

    fn fixture() -> Fixture {
        let styles = Arc::new(AtomicUsize::new(0));
        let scripts = Arc::new(AtomicUsize::new(0));
        let fail_scripts = Arc::new(AtomicBool::new(false));

        let mut registry = TaskRegistry::new();
        registry.register(counter_task("styles-dev", &styles, None)).unwrap();
        registry
            .register(counter_task("scripts-dev", &scripts, Some(Arc::clone(&fail_scripts))))
            .unwrap();

        let runner = Arc::new(TaskRunner::new(Arc::new(registry)));
        let watcher = FileWatcher::new("/project", runner, WatchConfig::default());
        Fixture { watcher, styles, scripts, fail_scripts }
    }

    #[test]
    fn test_binding_matching() {
        let binding = WatchBinding::new(["src/scss/**/*.scss"], "styles-dev").unwrap();
        assert!(binding.matches(Path::new("src/scss/style.scss")));
        assert!(binding.matches(Path::new("src/scss/components/_button.scss")));
        assert!(!binding.matches(Path::new("src/js/index.js")));
        assert!(!binding.matches(Path::new("src/scss/style.css")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            WatchBinding::new(["src/[scss"], "x"),
            Err(WatchError::InvalidPattern(_, _))
        ));
    }

    #[test]
    fn test_scss_change_triggers_only_style_task() {
        let f = fixture();
        f.watcher.watch(WatchBinding::new(["src/scss/**/*.scss"], "styles-dev").unwrap());
        f.watcher.watch(WatchBinding::new(["src/js/**/*.js"], "scripts-dev").unwrap());

        let reports = f.watcher.dispatch(&[PathBuf::from("/project/src/scss/style.scss")]);

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].task_id, "styles-dev");
        assert_eq!(f.styles.load(Ordering::SeqCst), 1);
        assert_eq!(f.scripts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_one_run_per_batch() {
        let f = fixture();
        f.watcher.watch(WatchBinding::new(["src/scss/**/*.scss"], "styles-dev").unwrap());

        f.watcher.dispatch(&[
            PathBuf::from("src/scss/a.scss"),
            PathBuf::from("src/scss/b.scss"),
            PathBuf::from("src/scss/deleted.scss"),
        ]);

        assert_eq!(f.styles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_runs_only_after_success() {
        let f = fixture();
        let hooked = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hooked);
        f.watcher.watch(
            WatchBinding::new(["src/js/**/*.js"], "scripts-dev")
                .unwrap()
                .with_hook(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
        );

        f.fail_scripts.store(true, Ordering::SeqCst);
        f.watcher.dispatch(&[PathBuf::from("src/js/index.js")]);
        assert_eq!(hooked.load(Ordering::SeqCst), 0);

        f.fail_scripts.store(false, Ordering::SeqCst);
        f.watcher.dispatch(&[PathBuf::from("src/js/index.js")]);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);
        assert_eq!(f.scripts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_removes_binding() {
        let f = fixture();
        let handle = f.watcher.watch(WatchBinding::new(["src/scss/*.scss"], "styles-dev").unwrap());
        assert_eq!(f.watcher.binding_count(), 1);

        assert!(handle.cancel());
        assert_eq!(f.watcher.binding_count(), 0);
        assert!(f.watcher.dispatch(&[PathBuf::from("src/scss/a.scss")]).is_empty());
    }

    #[test]
    fn test_unrelated_paths_ignored() {
        let f = fixture();
        f.watcher.watch(WatchBinding::new(["src/scss/*.scss"], "styles-dev").unwrap());
        assert!(f.watcher.dispatch(&[PathBuf::from("/elsewhere/src/scss/a.scss")]).is_empty());
    }

    #[test]
    fn test_error_tracker_recovery() {
        let failed = TaskReport::leaf(
            "scripts-dev".into(),
            PipelineResult::Failure(StageError::new("scripts", "bad")),
            Duration::ZERO,
        );
        let fixed = TaskReport::leaf("scripts-dev".into(), PipelineResult::Success(vec![]), Duration::ZERO);

        let mut tracker = ErrorTracker::new();
        assert!(tracker.update(&failed).is_empty());
        assert!(tracker.has_errors());
        assert_eq!(tracker.update(&fixed), vec!["scripts-dev".to_string()]);
        assert!(!tracker.has_errors());
        assert!(tracker.update(&fixed).is_empty());
    }

    #[test]
    fn test_run_missing_directory() {
        let f = fixture();
        let result = f.watcher.run(&[PathBuf::from("/definitely/not/here")]);
        assert!(matches!(result, Err(WatchError::SourceNotFound(_))));
    }
}
