//! Task result types.
//!
//! Contains types for representing the outcome of pipeline stages and task runs.

use std::path::PathBuf;
use std::time::Duration;

/// A detailed pipeline stage failure with optional file location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    /// Name of the stage that failed (e.g. "styles", "templates")
    pub stage: String,
    /// File being processed when the stage failed
    pub file: Option<PathBuf>,
    /// Line number (1-indexed, None if unknown)
    pub line: Option<usize>,
    /// Error message
    pub message: String,
}

impl StageError {
    /// Create a new stage error without location information.
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self { stage: stage.into(), file: None, line: None, message: message.into() }
    }

    /// Attach the file that was being processed.
    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Attach a line number.
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.stage)?;
        if let Some(file) = &self.file {
            write!(f, " {}", file.display())?;
            if let Some(line) = self.line {
                write!(f, ":{}", line)?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for StageError {}

/// Outcome of a single leaf action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// Files written by the action
    Success(Vec<PathBuf>),
    /// The action failed; the cause is reported, never propagated
    Failure(StageError),
}

impl PipelineResult {
    /// Check if the action succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success(_))
    }

    /// Output files (empty on failure).
    pub fn outputs(&self) -> &[PathBuf] {
        match self {
            PipelineResult::Success(paths) => paths,
            PipelineResult::Failure(_) => &[],
        }
    }
}

impl From<Result<Vec<PathBuf>, StageError>> for PipelineResult {
    fn from(result: Result<Vec<PathBuf>, StageError>) -> Self {
        match result {
            Ok(paths) => PipelineResult::Success(paths),
            Err(e) => PipelineResult::Failure(e),
        }
    }
}

/// Status of a task after it settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Every action in the task succeeded
    Completed,
    /// A leaf task failed with the given cause
    Failed(String),
    /// A composite task in which the listed leaf tasks failed
    PartiallyFailed(Vec<String>),
}

impl TaskStatus {
    /// Check if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Check if the status indicates failure.
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed(err) => write!(f, "failed: {}", err),
            TaskStatus::PartiallyFailed(ids) => write!(f, "partially failed: {}", ids.join(", ")),
        }
    }
}

/// Result of running a task (and, for compositions, its members).
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Task ID that was run
    pub task_id: String,
    /// Final status
    pub status: TaskStatus,
    /// Output files produced by this task (leaf) or its members (composite)
    pub outputs: Vec<PathBuf>,
    /// Run duration
    pub duration: Duration,
    /// Member reports in declaration order (empty for leaves)
    pub children: Vec<TaskReport>,
    leaf: bool,
}

impl TaskReport {
    /// Create a report for a settled leaf task.
    pub fn leaf(task_id: String, result: PipelineResult, duration: Duration) -> Self {
        match result {
            PipelineResult::Success(outputs) => Self {
                task_id,
                status: TaskStatus::Completed,
                outputs,
                duration,
                children: vec![],
                leaf: true,
            },
            PipelineResult::Failure(err) => Self {
                task_id,
                status: TaskStatus::Failed(err.to_string()),
                outputs: vec![],
                duration,
                children: vec![],
                leaf: true,
            },
        }
    }

    /// Create a report for a composite task from its member reports.
    pub fn composite(task_id: String, children: Vec<TaskReport>, duration: Duration) -> Self {
        let failed: Vec<String> =
            children.iter().flat_map(|c| c.failed_leaves()).map(|r| r.task_id.clone()).collect();
        let outputs = children.iter().flat_map(|c| c.outputs.iter().cloned()).collect();
        let status =
            if failed.is_empty() { TaskStatus::Completed } else { TaskStatus::PartiallyFailed(failed) };
        Self { task_id, status, outputs, duration, children, leaf: false }
    }

    /// True for reports of leaf tasks; an empty composite is not a leaf.
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    /// Check if the task completed without any failure.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Leaf reports that failed, in execution order.
    pub fn failed_leaves(&self) -> Vec<&TaskReport> {
        if self.leaf {
            if self.status.is_failure() {
                vec![self]
            } else {
                vec![]
            }
        } else {
            self.children.iter().flat_map(|c| c.failed_leaves()).collect()
        }
    }

    /// Number of leaf tasks in this report.
    pub fn leaf_count(&self) -> usize {
        if self.leaf {
            1
        } else {
            self.children.iter().map(|c| c.leaf_count()).sum()
        }
    }

    /// Format a summary of the run.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        let failures = self.failed_leaves();
        let total = self.leaf_count();

        if failures.is_empty() {
            lines.push(format!(
                "'{}' completed: {} task{}, {} file{} written in {:?}",
                self.task_id,
                total,
                if total == 1 { "" } else { "s" },
                self.outputs.len(),
                if self.outputs.len() == 1 { "" } else { "s" },
                self.duration
            ));
        } else {
            lines.push(format!(
                "'{}' failed: {} succeeded, {} failed ({} total)",
                self.task_id,
                total - failures.len(),
                failures.len(),
                total
            ));
            for report in failures {
                lines.push(format!("  - {}: {}", report.task_id, report.status));
            }
        }

        lines.join("\n")
    }
}
