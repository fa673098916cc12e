//! Dev command implementation

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use super::{load_context, site_runner, EXIT_ERROR, EXIT_INVALID_ARGS};
use crate::config::CliOverrides;
use crate::server::DevServer;
use crate::site::{dev_bindings, watch_dirs};
use crate::task::progress::ProgressEvent;
use crate::watch::FileWatcher;

/// Build the dev assets, start the dev server and rebuild on change.
///
/// Runs until interrupted; returns only when startup fails or the watch
/// stops.
pub fn run_dev(config: Option<&Path>, overrides: &CliOverrides, verbose: bool, json: bool) -> ExitCode {
    let ctx = match load_context(config, overrides, verbose) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    let runner = match site_runner(&ctx, json) {
        Ok(runner) => runner,
        Err(code) => return code,
    };

    let server_config = &ctx.config().server;
    let addr = match DevServer::listen_addr(&server_config.host, server_config.port) {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let out_dir = ctx.out_dir();
    if let Err(e) = fs::create_dir_all(&out_dir) {
        eprintln!("Error: Cannot create output directory '{}': {}", out_dir.display(), e);
        return ExitCode::from(EXIT_ERROR);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Cannot start async runtime: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let server = Arc::new(DevServer::new(&out_dir));
    let bound = match runtime.block_on(server.start(addr)) {
        Ok(bound) => bound,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    // A failed initial build is reported but doesn't stop the preview
    if let Err(e) = runner.run("dev-assets") {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    let watcher = FileWatcher::new(ctx.project_root(), Arc::clone(&runner), ctx.config().watch.clone());
    let bindings = match dev_bindings(&ctx, Some(Arc::clone(&server))) {
        Ok(bindings) => bindings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    for binding in bindings {
        watcher.watch(binding);
    }

    runner.reporter().report(ProgressEvent::Info {
        message: format!("Serving {} at http://{}", out_dir.display(), bound),
    });
    runner.reporter().report(ProgressEvent::Info { message: "Press Ctrl+C to stop".to_string() });

    match watcher.run(&watch_dirs(&ctx)) {
        Ok(()) => {
            eprintln!("Watch stopped");
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
