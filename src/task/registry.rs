//! Task definitions and the registry that stores them.
//!
//! A task is either a leaf wrapping an [`Action`] or a composition of other
//! tasks referenced by id. Compositions may reference tasks registered later;
//! the graph is checked by [`TaskRegistry::validate`] before anything runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use super::result::PipelineResult;

/// Registry misuse. These are programmer errors and are surfaced immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A task with this id is already registered
    #[error("task '{0}' is already registered")]
    Duplicate(String),
    /// No task with this id is registered
    #[error("unknown task '{0}'")]
    Unknown(String),
    /// The composition graph loops back through this task
    #[error("task '{0}' depends on itself")]
    Cycle(String),
}

/// Work performed by a leaf task.
pub trait Action: Send + Sync {
    /// Run the action. Implementations report failure through the result
    /// instead of panicking.
    fn run(&self) -> PipelineResult;
}

impl<F> Action for F
where
    F: Fn() -> PipelineResult + Send + Sync,
{
    fn run(&self) -> PipelineResult {
        self()
    }
}

/// What a task does when run.
#[derive(Clone)]
pub enum TaskKind {
    /// Run a single action
    Leaf(Arc<dyn Action>),
    /// Run members in order, each waiting for the previous to settle
    Sequential(Vec<String>),
    /// Run members concurrently and settle when all have settled
    Parallel(Vec<String>),
}

impl TaskKind {
    /// Member ids for compositions, empty for leaves.
    pub fn members(&self) -> &[String] {
        match self {
            TaskKind::Leaf(_) => &[],
            TaskKind::Sequential(members) | TaskKind::Parallel(members) => members,
        }
    }
}

impl std::fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Leaf(_) => write!(f, "Leaf(..)"),
            TaskKind::Sequential(m) => f.debug_tuple("Sequential").field(m).finish(),
            TaskKind::Parallel(m) => f.debug_tuple("Parallel").field(m).finish(),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Leaf(_) => write!(f, "task"),
            TaskKind::Sequential(m) => write!(f, "series({})", m.join(", ")),
            TaskKind::Parallel(m) => write!(f, "parallel({})", m.join(", ")),
        }
    }
}

/// A named unit of build work.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique identifier (e.g. "styles-build")
    pub id: String,
    /// What the task does
    pub kind: TaskKind,
    /// Human-readable description shown by `assetflow tasks`
    pub description: Option<String>,
}

impl Task {
    /// Create a leaf task.
    pub fn leaf(id: impl Into<String>, action: impl Action + 'static) -> Self {
        Self { id: id.into(), kind: TaskKind::Leaf(Arc::new(action)), description: None }
    }

    /// Create a sequential composition.
    pub fn sequential<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            kind: TaskKind::Sequential(members.into_iter().map(Into::into).collect()),
            description: None,
        }
    }

    /// Create a parallel composition.
    pub fn parallel<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            kind: TaskKind::Parallel(members.into_iter().map(Into::into).collect()),
            description: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Storage for named tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<Task>>,
    /// Registration order, for listing
    order: Vec<String>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails if the id is taken; the existing task is kept.
    pub fn register(&mut self, task: Task) -> Result<Arc<Task>, TaskError> {
        if self.tasks.contains_key(&task.id) {
            return Err(TaskError::Duplicate(task.id));
        }
        let task = Arc::new(task);
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), Arc::clone(&task));
        Ok(task)
    }

    /// Look up a task by id.
    pub fn resolve(&self, id: &str) -> Result<Arc<Task>, TaskError> {
        self.tasks.get(id).cloned().ok_or_else(|| TaskError::Unknown(id.to_string()))
    }

    /// Borrow a task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id).map(Arc::as_ref)
    }

    /// Check whether a task is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Task ids in registration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Check that `id` and everything it composes exist and form no cycle.
    ///
    /// Returns the reachable tasks in dependency order (members before the
    /// compositions that use them).
    pub fn validate(&self, id: &str) -> Result<Vec<Arc<Task>>, TaskError> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        self.visit(id, &mut visited, &mut visiting, &mut result)?;
        Ok(result)
    }

    fn visit(
        &self,
        id: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        result: &mut Vec<Arc<Task>>,
    ) -> Result<(), TaskError> {
        if visited.contains(id) {
            return Ok(());
        }

        if visiting.contains(id) {
            return Err(TaskError::Cycle(id.to_string()));
        }

        let task = self.resolve(id)?;
        visiting.insert(id.to_string());

        for member in task.kind.members() {
            self.visit(member, visited, visiting, result)?;
        }

        visiting.remove(id);
        visited.insert(id.to_string());
        result.push(task);

        Ok(())
    }
}
