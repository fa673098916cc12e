//! Tasks command implementation

use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;

use super::{load_context, EXIT_ERROR, EXIT_SUCCESS};
use crate::config::CliOverrides;
use crate::site::site_registry;
use crate::task::{TaskKind, TaskRegistry};

#[derive(Debug, Serialize)]
struct TaskInfo<'a> {
    id: &'a str,
    kind: &'static str,
    members: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

fn task_infos(registry: &TaskRegistry) -> Vec<TaskInfo<'_>> {
    registry
        .ids()
        .iter()
        .filter_map(|id| registry.get(id))
        .map(|task| TaskInfo {
            id: &task.id,
            kind: match task.kind {
                TaskKind::Leaf(_) => "task",
                TaskKind::Sequential(_) => "series",
                TaskKind::Parallel(_) => "parallel",
            },
            members: task.kind.members(),
            description: task.description.as_deref(),
        })
        .collect()
}

/// List the site recipe's tasks in registration order.
pub fn run_tasks(config: Option<&Path>, overrides: &CliOverrides, json: bool) -> ExitCode {
    let ctx = match load_context(config, overrides, false) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    let registry = match site_registry(&ctx) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let infos = task_infos(&registry);
    if json {
        match serde_json::to_string_pretty(&infos) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
        return ExitCode::from(EXIT_SUCCESS);
    }

    let width = infos.iter().map(|t| t.id.len()).max().unwrap_or(0);
    for info in &infos {
        let mut line = format!("  {:<width$}  {}", info.id, info.description.unwrap_or(""), width = width);
        if !info.members.is_empty() {
            line.push_str(&format!(" [{}: {}]", info.kind, info.members.join(", ")));
        }
        println!("{}", line.trim_end());
    }
    ExitCode::from(EXIT_SUCCESS)
}
