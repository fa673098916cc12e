//! Task progress reporting.
//!
//! The runner reports every task start and finish through a
//! [`ProgressReporter`]. Console output (with colors when attached to a
//! terminal) and JSON lines are provided.
//!
//! # Example
//!
//! ```ignore
//! use assetflow::task::progress::{ConsoleProgress, ProgressEvent, ProgressReporter};
//!
//! let reporter = ConsoleProgress::new();
//! reporter.report(ProgressEvent::TaskStarted { task_id: "styles-build".to_string() });
//! ```

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// Events that can be reported while tasks run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A top-level run started
    RunStarted {
        /// Task requested by the caller
        task_id: String,
        /// Number of leaf tasks that will run
        leaves: usize,
    },
    /// A leaf task started
    TaskStarted {
        /// Task identifier
        task_id: String,
    },
    /// A leaf task settled
    TaskCompleted {
        /// Task identifier
        task_id: String,
        /// Whether the action succeeded
        success: bool,
        /// Failure cause, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Number of files written
        outputs: usize,
        /// Duration in milliseconds
        duration_ms: u64,
    },
    /// A top-level run settled
    RunCompleted {
        /// Task requested by the caller
        task_id: String,
        /// Whether every leaf succeeded
        success: bool,
        /// Number of successful leaves
        succeeded: usize,
        /// Number of failed leaves
        failed: usize,
        /// Total duration in milliseconds
        duration_ms: u64,
    },
    /// A task recovered after failing in a previous watch run
    Recovered {
        /// Task identifier
        task_id: String,
    },
    /// Informational message (watch and server lifecycle)
    Info {
        /// Message text
        message: String,
    },
}

/// Trait for progress reporters.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event.
    fn report(&self, event: ProgressEvent);
}

/// A progress reporter that discards all events.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Console progress reporter with optional colors.
pub struct ConsoleProgress {
    /// Whether to use colors
    use_colors: bool,
    /// Whether to print task starts
    verbose: bool,
    /// Output writer (for testing)
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ConsoleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleProgress")
            .field("use_colors", &self.use_colors)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl ConsoleProgress {
    /// Create a console reporter writing to stderr.
    pub fn new() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stderr),
            verbose: false,
            output: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    /// Create a console reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self {
            use_colors: false, // Disable colors for custom output
            verbose: false,
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Set whether to use colors.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn color(&self, text: &str, color: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn green(&self, text: &str) -> String {
        self.color(text, "\x1b[32m")
    }

    fn red(&self, text: &str) -> String {
        self.color(text, "\x1b[31m")
    }

    fn cyan(&self, text: &str) -> String {
        self.color(text, "\x1b[36m")
    }

    fn writeln(&self, line: &str) {
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "[{}] {}", timestamp(), line);
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { task_id, leaves } => {
                self.writeln(&format!(
                    "{} Starting '{}' ({} task{})",
                    self.cyan("[run]"),
                    task_id,
                    leaves,
                    if leaves == 1 { "" } else { "s" }
                ));
            }
            ProgressEvent::TaskStarted { task_id } => {
                if self.verbose {
                    self.writeln(&format!("{} {}...", self.cyan("[run]"), task_id));
                }
            }
            ProgressEvent::TaskCompleted { task_id, success, error, outputs, duration_ms } => {
                let status = if success { self.green("ok") } else { self.red("FAILED") };
                self.writeln(&format!(
                    "{} {} {} ({} file{}, {})",
                    self.cyan("[run]"),
                    status,
                    task_id,
                    outputs,
                    if outputs == 1 { "" } else { "s" },
                    format_duration(duration_ms)
                ));
                if let Some(err) = error {
                    self.writeln(&format!("        {}", self.red(&err)));
                }
            }
            ProgressEvent::RunCompleted { task_id, success, succeeded, failed, duration_ms } => {
                if success {
                    self.writeln(&format!(
                        "{} Finished '{}' after {}",
                        self.green("[done]"),
                        task_id,
                        format_duration(duration_ms)
                    ));
                } else {
                    self.writeln(&format!(
                        "{} '{}' finished with errors: {} succeeded, {} {} in {}",
                        self.red("[error]"),
                        task_id,
                        succeeded,
                        failed,
                        if failed == 1 { "failure" } else { "failures" },
                        format_duration(duration_ms)
                    ));
                }
            }
            ProgressEvent::Recovered { task_id } => {
                self.writeln(&format!("{} {}", self.green("[fixed]"), task_id));
            }
            ProgressEvent::Info { message } => {
                self.writeln(&format!("{} {}", self.cyan("[info]"), message));
            }
        }
    }
}

/// JSON progress reporter for machine-readable output.
pub struct JsonProgress {
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonProgress").finish()
    }
}

impl JsonProgress {
    /// Create a new JSON progress reporter writing to stderr.
    pub fn new() -> Self {
        Self { output: Mutex::new(Box::new(std::io::stderr())) }
    }

    /// Create a JSON progress reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self { output: Mutex::new(Box::new(output)) }
    }
}

impl Default for JsonProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let Ok(json) = serde_json::to_string(&event) else {
            return;
        };
        if let Ok(mut output) = self.output.lock() {
            let _ = writeln!(output, "{}", json);
        }
    }
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.2}s", ms as f64 / 1000.0)
    }
}

/// Wall-clock time of day for log prefixes.
fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
