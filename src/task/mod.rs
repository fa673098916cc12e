//! Task graph: registry, runner, results and progress reporting.
//!
//! # Example
//!
//! ```ignore
//! use assetflow::task::{PipelineResult, Task, TaskRegistry, TaskRunner};
//! use std::sync::Arc;
//!
//! let mut registry = TaskRegistry::new();
//! registry.register(Task::leaf("styles", || PipelineResult::Success(vec![])))?;
//! registry.register(Task::leaf("scripts", || PipelineResult::Success(vec![])))?;
//! registry.register(Task::parallel("build", ["styles", "scripts"]))?;
//!
//! let report = TaskRunner::new(Arc::new(registry)).run("build")?;
//! println!("{}", report.summary());
//! ```

pub mod progress;
pub mod registry;
pub mod result;
pub mod runner;

pub use registry::*;
pub use result::*;
pub use runner::*;
