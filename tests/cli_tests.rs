//! CLI integration tests
//!
//! These tests run the assetflow binary against a temporary site and check
//! exit codes and output.

mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::{site, write};

fn assetflow(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_assetflow"))
        .current_dir(dir)
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute assetflow")
}

#[test]
fn test_build_succeeds() {
    let temp = site();
    let output = assetflow(temp.path(), &["build"]);

    assert!(output.status.success(), "build failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(temp.path().join("public/index.html").is_file());
    assert!(temp.path().join("public/sitemap.xml").is_file());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("6 tasks"), "{}", stdout);
}

#[test]
fn test_build_with_failed_pipeline_exits_1() {
    let temp = site();
    write(temp.path(), "src/scss/style.scss", ".broken[ { color: red; }\n");

    let output = assetflow(temp.path(), &["build"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(temp.path().join("public/index.html").is_file(), "siblings still ran");
}

#[test]
fn test_run_single_task() {
    let temp = site();
    let output = assetflow(temp.path(), &["run", "pug-build"]);

    assert!(output.status.success());
    assert!(temp.path().join("public/about.html").is_file());
    assert!(!temp.path().join("public/assets").exists());
}

#[test]
fn test_run_unknown_task_exits_2() {
    let temp = site();
    let output = assetflow(temp.path(), &["run", "deploy"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown task 'deploy'"));
}

#[test]
fn test_invalid_arguments_exit_2() {
    let temp = site();
    assert_eq!(assetflow(temp.path(), &["frobnicate"]).status.code(), Some(2));
    assert_eq!(assetflow(temp.path(), &["build", "--config", "nope.toml"]).status.code(), Some(2));
}

#[test]
fn test_tasks_lists_recipe() {
    let temp = site();
    let output = assetflow(temp.path(), &["tasks"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for id in ["styles-dev", "pug-build", "images-build", "sitemap", "cache", "build", "dev-assets"] {
        assert!(stdout.contains(id), "missing {} in:\n{}", id, stdout);
    }
}

#[test]
fn test_tasks_json() {
    let temp = site();
    let output = assetflow(temp.path(), &["tasks", "--json"]);

    assert!(output.status.success());
    let tasks: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let build = tasks.as_array().unwrap().iter().find(|t| t["id"] == "build").unwrap();
    assert_eq!(build["kind"], "series");
}

#[test]
fn test_json_progress_on_stderr() {
    let temp = site();
    let output = assetflow(temp.path(), &["run", "pug-build", "--json"]);

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    let events: Vec<serde_json::Value> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    assert_eq!(events.first().unwrap()["event"], "run_started");
    assert_eq!(events.last().unwrap()["event"], "run_completed");
}

#[test]
fn test_invalid_config_exits_1() {
    let temp = site();
    write(temp.path(), "assetflow.toml", "[project]\nname = \"x\"\n\n[images]\njpeg_quality = 0\n");

    let output = assetflow(temp.path(), &["build"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("jpeg_quality"));
}
