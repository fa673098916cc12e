//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod dev;
mod tasks;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::config::{default_config, find_config, load_config, merge_cli_overrides, CliOverrides};
use crate::context::BuildContext;
use crate::site::site_registry;
use crate::task::progress::{ConsoleProgress, JsonProgress, ProgressReporter};
use crate::task::TaskRunner;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Assetflow - build static-site assets and serve a live-reloading preview
#[derive(Parser)]
#[command(name = "assetflow")]
#[command(about = "Assetflow - build static-site assets and serve a live-reloading preview")]
#[command(version)]
pub struct Cli {
    /// Path to assetflow.toml (default: search upward from the current directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the source directory
    #[arg(long, global = true)]
    pub src: Option<PathBuf>,

    /// Override the output directory
    #[arg(long, global = true)]
    pub out: Option<PathBuf>,

    /// Show every task as it starts
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Report progress as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build development assets, serve the output directory and rebuild on change
    Dev {
        /// Host to bind the dev server to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind the dev server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run every production task
    Build,
    /// Run a single task by id
    Run {
        /// Task id (see `assetflow tasks`)
        task: String,
    },
    /// List registered tasks
    Tasks,
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        src: cli.src.clone(),
        out: cli.out.clone(),
        ..Default::default()
    };

    match cli.command {
        Commands::Dev { host, port } => {
            let overrides = CliOverrides { host, port, ..overrides };
            dev::run_dev(cli.config.as_deref(), &overrides, cli.verbose, cli.json)
        }
        Commands::Build => build::run_task("build", cli.config.as_deref(), &overrides, cli.verbose, cli.json),
        Commands::Run { task } => build::run_task(&task, cli.config.as_deref(), &overrides, cli.verbose, cli.json),
        Commands::Tasks => tasks::run_tasks(cli.config.as_deref(), &overrides, cli.json),
    }
}

/// Load the configuration and build the context for a command.
///
/// Errors are printed; the caller returns the exit code.
pub(crate) fn load_context(
    config_path: Option<&Path>,
    overrides: &CliOverrides,
    verbose: bool,
) -> Result<BuildContext, ExitCode> {
    let config_path = match config_path {
        Some(p) if !p.exists() => {
            eprintln!("Error: Config file not found: {}", p.display());
            return Err(ExitCode::from(EXIT_INVALID_ARGS));
        }
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    let (mut config, project_root) = match config_path {
        Some(path) => {
            if verbose {
                eprintln!("Using config: {}", path.display());
            }
            let config = load_config(Some(&path)).map_err(|e| {
                eprintln!("Error loading config: {}", e);
                ExitCode::from(EXIT_ERROR)
            })?;
            let root = crate::config::project_root(&path)
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
            (config, root)
        }
        None => {
            if verbose {
                eprintln!("No assetflow.toml found, using defaults");
            }
            (default_config(), std::env::current_dir().unwrap_or_default())
        }
    };

    merge_cli_overrides(&mut config, overrides);
    Ok(BuildContext::new(config, project_root).with_verbose(verbose))
}

/// Build the site recipe and a runner reporting to the console or JSON.
pub(crate) fn site_runner(ctx: &BuildContext, json: bool) -> Result<Arc<TaskRunner>, ExitCode> {
    let registry = site_registry(ctx).map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::from(EXIT_ERROR)
    })?;

    let reporter: Arc<dyn ProgressReporter> = if json {
        Arc::new(JsonProgress::new())
    } else {
        Arc::new(ConsoleProgress::new().with_verbose(ctx.is_verbose()))
    };

    Ok(Arc::new(TaskRunner::new(Arc::new(registry)).with_reporter(reporter)))
}
