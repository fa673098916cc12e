//! Built-in pipeline stages.

pub mod cache_bust;
pub mod images;
pub mod scripts;
pub mod sitemap;
pub mod source_map;
pub mod styles;
pub mod templates;

pub use cache_bust::CacheBust;
pub use images::OptimizeImages;
pub use scripts::{BundleScripts, MinifyExt, MinifyScripts};
pub use sitemap::Sitemap;
pub use styles::{resolve_browsers, CompileStyles, OutputStyle, PostProcess};
pub use templates::RenderTemplates;
