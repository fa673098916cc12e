//! Configuration module
//!
//! Provides types and parsing for `assetflow.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
