//! Assetflow - asset build orchestration for static sites
//!
//! This library provides:
//! - A task registry with sequential and parallel composition, and a runner
//!   that keeps going when individual pipelines fail
//! - Source → stage → destination pipelines with built-in stages for
//!   stylesheets, templates, scripts, images, sitemaps and cache busting
//! - A debounced file watcher that re-runs bound tasks
//! - A dev server that serves the output directory and live-reloads browsers

pub mod cli;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod server;
pub mod site;
pub mod stages;
pub mod task;
pub mod watch;
