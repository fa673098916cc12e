//! Build command implementations (build, run)

use std::path::Path;
use std::process::ExitCode;

use super::{load_context, site_runner, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::config::CliOverrides;
use crate::task::TaskError;

/// Run a task from the site recipe and exit non-zero if any leaf failed.
pub fn run_task(
    task_id: &str,
    config: Option<&Path>,
    overrides: &CliOverrides,
    verbose: bool,
    json: bool,
) -> ExitCode {
    let ctx = match load_context(config, overrides, verbose) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };

    let src_dir = ctx.src_dir();
    if !src_dir.exists() {
        eprintln!("Error: Source directory not found: {}", src_dir.display());
        eprintln!("Create the directory or specify a different path with --src");
        return ExitCode::from(EXIT_ERROR);
    }

    let runner = match site_runner(&ctx, json) {
        Ok(runner) => runner,
        Err(code) => return code,
    };

    match runner.run(task_id) {
        Ok(report) => {
            if !json {
                println!("{}", report.summary());
            }
            if report.is_success() {
                ExitCode::from(EXIT_SUCCESS)
            } else {
                ExitCode::from(EXIT_ERROR)
            }
        }
        Err(TaskError::Unknown(id)) => {
            eprintln!("Error: Unknown task '{}'", id);
            eprintln!("Run 'assetflow tasks' to list available tasks");
            ExitCode::from(EXIT_INVALID_ARGS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
