//! Task graph execution.
//!
//! The runner interprets a task's [`TaskKind`]:
//!
//! - **Leaf**: run the action; a panic becomes a failed report
//! - **Sequential**: members run in declaration order; a failed member is
//!   reported and the next member still runs
//! - **Parallel**: every member runs on its own scoped thread; the composite
//!   settles after all members settled, and a failure never aborts siblings

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::progress::{NullProgress, ProgressEvent, ProgressReporter};
use super::registry::{Action, Task, TaskError, TaskKind, TaskRegistry};
use super::result::{PipelineResult, StageError, TaskReport};

/// Executes tasks from a registry.
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner").field("tasks", &self.registry.len()).finish()
    }
}

impl TaskRunner {
    /// Create a runner with no progress output.
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry, reporter: Arc::new(NullProgress) }
    }

    /// Set the progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The registry this runner executes from.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The progress reporter.
    pub fn reporter(&self) -> &Arc<dyn ProgressReporter> {
        &self.reporter
    }

    /// Run a task and everything it composes.
    ///
    /// The graph is validated before any action runs, so an unknown member or
    /// a cycle is returned as an error without side effects. Action failures
    /// are never errors here: they are recorded in the returned report.
    pub fn run(&self, id: &str) -> Result<TaskReport, TaskError> {
        let reachable = self.registry.validate(id)?;
        let leaves = reachable.iter().filter(|t| matches!(t.kind, TaskKind::Leaf(_))).count();
        let task = self.registry.resolve(id)?;

        tracing::debug!(task = id, leaves, "run started");
        self.reporter.report(ProgressEvent::RunStarted { task_id: id.to_string(), leaves });

        let report = self.execute(&task);

        let failed = report.failed_leaves().len();
        tracing::debug!(task = id, failed, "run finished");
        self.reporter.report(ProgressEvent::RunCompleted {
            task_id: id.to_string(),
            success: report.is_success(),
            succeeded: report.leaf_count() - failed,
            failed,
            duration_ms: report.duration.as_millis() as u64,
        });

        Ok(report)
    }

    fn execute(&self, task: &Task) -> TaskReport {
        match &task.kind {
            TaskKind::Leaf(action) => self.execute_leaf(&task.id, action.as_ref()),
            TaskKind::Sequential(members) => self.execute_sequential(&task.id, members),
            TaskKind::Parallel(members) => self.execute_parallel(&task.id, members),
        }
    }

    fn execute_member(&self, id: &str) -> TaskReport {
        match self.registry.resolve(id) {
            Ok(task) => self.execute(&task),
            // Unreachable after validate(), but a report beats a panic
            Err(e) => TaskReport::leaf(
                id.to_string(),
                PipelineResult::Failure(StageError::new("runner", e.to_string())),
                Default::default(),
            ),
        }
    }

    fn execute_leaf(&self, id: &str, action: &dyn Action) -> TaskReport {
        let start = Instant::now();
        self.reporter.report(ProgressEvent::TaskStarted { task_id: id.to_string() });

        let result = match panic::catch_unwind(AssertUnwindSafe(|| action.run())) {
            Ok(result) => result,
            Err(payload) => {
                PipelineResult::Failure(StageError::new(id, panic_message(payload.as_ref())))
            }
        };

        let duration = start.elapsed();
        if let PipelineResult::Failure(err) = &result {
            tracing::warn!(task = id, error = %err, "task failed");
        }

        let report = TaskReport::leaf(id.to_string(), result, duration);
        self.reporter.report(ProgressEvent::TaskCompleted {
            task_id: id.to_string(),
            success: report.is_success(),
            error: match &report.status {
                super::TaskStatus::Failed(cause) => Some(cause.clone()),
                _ => None,
            },
            outputs: report.outputs.len(),
            duration_ms: duration.as_millis() as u64,
        });
        report
    }

    fn execute_sequential(&self, id: &str, members: &[String]) -> TaskReport {
        let start = Instant::now();
        let mut children = Vec::with_capacity(members.len());

        for member in members {
            let report = self.execute_member(member);
            if !report.is_success() {
                tracing::info!(task = id, member = %member, "member failed, continuing series");
            }
            children.push(report);
        }

        TaskReport::composite(id.to_string(), children, start.elapsed())
    }

    fn execute_parallel(&self, id: &str, members: &[String]) -> TaskReport {
        let start = Instant::now();

        if members.len() <= 1 {
            let children = members.iter().map(|m| self.execute_member(m)).collect();
            return TaskReport::composite(id.to_string(), children, start.elapsed());
        }

        let children = std::thread::scope(|s| {
            let handles: Vec<_> = members
                .iter()
                .map(|member| (member, s.spawn(move || self.execute_member(member))))
                .collect();

            handles
                .into_iter()
                .map(|(member, handle)| {
                    handle.join().unwrap_or_else(|payload| {
                        TaskReport::leaf(
                            member.clone(),
                            PipelineResult::Failure(StageError::new(
                                member.as_str(),
                                panic_message(payload.as_ref()),
                            )),
                            Default::default(),
                        )
                    })
                })
                .collect()
        });

        TaskReport::composite(id.to_string(), children, start.elapsed())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskStatus};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the order in which leaves start and finish.
    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn step(journal: &Arc<Journal>, id: &str, fail: bool, delay_ms: u64) -> Task {
        let journal = Arc::clone(journal);
        let name = id.to_string();
        Task::leaf(id, move || {
            journal.push(format!("start:{}", name));
            std::thread::sleep(Duration::from_millis(delay_ms));
            journal.push(format!("end:{}", name));
            if fail {
                PipelineResult::Failure(StageError::new(name.as_str(), "boom"))
            } else {
                PipelineResult::Success(vec![PathBuf::from(format!("{}.out", name))])
            }
        })
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<ProgressEvent>>);

    impl ProgressReporter for Events {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_run_leaf() {
        let journal = Arc::new(Journal::default());
        let mut registry = TaskRegistry::new();
        registry.register(step(&journal, "styles", false, 0)).unwrap();

        let runner = TaskRunner::new(Arc::new(registry));
        let report = runner.run("styles").unwrap();

        assert!(report.is_success());
        assert_eq!(report.outputs, vec![PathBuf::from("styles.out")]);
    }

    #[test]
    fn test_run_unknown_task() {
        let runner = TaskRunner::new(Arc::new(TaskRegistry::new()));
        assert_eq!(runner.run("missing").unwrap_err(), TaskError::Unknown("missing".to_string()));
    }

    #[test]
    fn test_cycle_detected_before_any_action_runs() {
        let journal = Arc::new(Journal::default());
        let mut registry = TaskRegistry::new();
        registry.register(step(&journal, "a", false, 0)).unwrap();
        registry.register(Task::sequential("loop", ["a", "loop"])).unwrap();

        let runner = TaskRunner::new(Arc::new(registry));
        assert!(matches!(runner.run("loop"), Err(TaskError::Cycle(_))));
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_sequential_strict_order() {
        let journal = Arc::new(Journal::default());
        let mut registry = TaskRegistry::new();
        registry.register(step(&journal, "a", false, 20)).unwrap();
        registry.register(step(&journal, "b", false, 5)).unwrap();
        registry.register(step(&journal, "c", false, 0)).unwrap();
        registry.register(Task::sequential("series", ["a", "b", "c"])).unwrap();

        let report = TaskRunner::new(Arc::new(registry)).run("series").unwrap();

        assert!(report.is_success());
        assert_eq!(
            journal.entries(),
            vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
        );
    }

    #[test]
    fn test_sequential_continues_after_failure() {
        let journal = Arc::new(Journal::default());
        let mut registry = TaskRegistry::new();
        registry.register(step(&journal, "a", true, 0)).unwrap();
        registry.register(step(&journal, "b", false, 0)).unwrap();
        registry.register(step(&journal, "c", false, 0)).unwrap();
        registry.register(Task::sequential("series", ["a", "b", "c"])).unwrap();

        let report = TaskRunner::new(Arc::new(registry)).run("series").unwrap();

        assert_eq!(report.status, TaskStatus::PartiallyFailed(vec!["a".to_string()]));
        assert_eq!(journal.entries().len(), 6);
        assert_eq!(report.children.len(), 3);
        assert!(report.children[1].is_success());
        assert!(report.children[2].is_success());
        assert_eq!(report.outputs.len(), 2);
    }

    #[test]
    fn test_parallel_waits_for_all_members() {
        for n in [1usize, 2, 5] {
            let settled = Arc::new(AtomicUsize::new(0));
            let mut registry = TaskRegistry::new();
            let mut ids = Vec::new();
            for i in 0..n {
                let id = format!("member{}", i);
                let settled = Arc::clone(&settled);
                let delay = (n - i) as u64 * 10;
                registry
                    .register(Task::leaf(id.clone(), move || {
                        std::thread::sleep(Duration::from_millis(delay));
                        settled.fetch_add(1, Ordering::SeqCst);
                        PipelineResult::Success(vec![])
                    }))
                    .unwrap();
                ids.push(id);
            }
            registry.register(Task::parallel("all", ids.clone())).unwrap();

            let report = TaskRunner::new(Arc::new(registry)).run("all").unwrap();

            assert_eq!(settled.load(Ordering::SeqCst), n, "all {} members settled", n);
            let order: Vec<_> = report.children.iter().map(|c| c.task_id.clone()).collect();
            assert_eq!(order, ids);
        }
    }

    #[test]
    fn test_parallel_runs_members_concurrently() {
        let journal = Arc::new(Journal::default());
        let mut registry = TaskRegistry::new();
        registry.register(step(&journal, "slow", false, 100)).unwrap();
        registry.register(step(&journal, "fast", false, 0)).unwrap();
        registry.register(Task::parallel("both", ["slow", "fast"])).unwrap();

        TaskRunner::new(Arc::new(registry)).run("both").unwrap();

        let entries = journal.entries();
        let slow_end = entries.iter().position(|e| e == "end:slow").unwrap();
        let fast_start = entries.iter().position(|e| e == "start:fast").unwrap();
        assert!(fast_start < slow_end);
    }

    #[test]
    fn test_parallel_failure_does_not_abort_siblings() {
        let journal = Arc::new(Journal::default());
        let mut registry = TaskRegistry::new();
        registry.register(step(&journal, "styles", true, 0)).unwrap();
        registry.register(step(&journal, "scripts", false, 30)).unwrap();
        registry.register(step(&journal, "images", false, 10)).unwrap();
        registry.register(Task::parallel("build", ["styles", "scripts", "images"])).unwrap();

        let report = TaskRunner::new(Arc::new(registry)).run("build").unwrap();

        assert_eq!(report.status, TaskStatus::PartiallyFailed(vec!["styles".to_string()]));
        assert!(journal.entries().contains(&"end:scripts".to_string()));
        assert!(journal.entries().contains(&"end:images".to_string()));
    }

    #[test]
    fn test_panicking_action_becomes_failure() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Task::leaf("explode", || -> PipelineResult { panic!("tool crashed") }))
            .unwrap();
        registry.register(Task::leaf("fine", || PipelineResult::Success(vec![]))).unwrap();
        registry.register(Task::sequential("series", ["explode", "fine"])).unwrap();

        let report = TaskRunner::new(Arc::new(registry)).run("series").unwrap();

        match &report.children[0].status {
            TaskStatus::Failed(msg) => assert!(msg.contains("tool crashed")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(report.children[1].is_success());
    }

    #[test]
    fn test_empty_composite_counts_no_leaves() {
        let events = Arc::new(Events::default());
        let mut registry = TaskRegistry::new();
        registry.register(Task::parallel("noop", Vec::<String>::new())).unwrap();

        let runner = TaskRunner::new(Arc::new(registry)).with_reporter(events.clone());
        assert!(runner.run("noop").unwrap().is_success());

        let events = events.0.lock().unwrap();
        assert_eq!(events.first(), Some(&ProgressEvent::RunStarted { task_id: "noop".into(), leaves: 0 }));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::RunCompleted { success: true, succeeded: 0, failed: 0, .. })
        ));
    }

    #[test]
    fn test_progress_events() {
        let events = Arc::new(Events::default());
        let mut registry = TaskRegistry::new();
        registry.register(Task::leaf("a", || PipelineResult::Success(vec![]))).unwrap();
        registry
            .register(Task::leaf("b", || {
                PipelineResult::Failure(StageError::new("b", "bad input"))
            }))
            .unwrap();
        registry.register(Task::sequential("ab", ["a", "b"])).unwrap();

        let runner = TaskRunner::new(Arc::new(registry)).with_reporter(events.clone());
        runner.run("ab").unwrap();

        let events = events.0.lock().unwrap();
        assert_eq!(events.first(), Some(&ProgressEvent::RunStarted { task_id: "ab".into(), leaves: 2 }));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::RunCompleted { success: false, succeeded: 1, failed: 1, .. })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::TaskCompleted { task_id, error: Some(err), .. }
                if task_id == "b" && err.contains("bad input")
        )));
    }
}
