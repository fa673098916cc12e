//! Configuration schema types for `assetflow.toml`
//!
//! Defines the structure and validation rules for project configuration.
//! Source patterns are relative to `[project] src`, destinations to
//! `[project] out`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Project metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required)
    pub name: String,
    /// Source directory
    #[serde(default = "default_src")]
    pub src: PathBuf,
    /// Output directory served by the dev server
    #[serde(default = "default_out")]
    pub out: PathBuf,
}

fn default_src() -> PathBuf {
    PathBuf::from("src")
}

fn default_out() -> PathBuf {
    PathBuf::from("public")
}

/// Public site settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Root URL used for sitemap locations
    #[serde(default = "default_site_url")]
    pub url: String,
}

fn default_site_url() -> String {
    "https://example.com".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { url: default_site_url() }
    }
}

/// Post-processing options applied to compiled CSS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinifyConfig {
    /// Minify (whitespace, shorthands, colors)
    #[serde(default = "default_true")]
    pub core: bool,
    /// Rebase z-index values (accepted, not applied)
    #[serde(default)]
    pub zindex: bool,
    /// Add vendor prefixes for `styles.browsers`
    #[serde(default = "default_true")]
    pub autoprefixer: bool,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self { core: true, zindex: false, autoprefixer: true }
    }
}

/// Stylesheet pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesConfig {
    /// Entry stylesheet(s)
    #[serde(default = "default_styles_entry")]
    pub entry: String,
    /// Files that trigger a rebuild in dev mode
    #[serde(default = "default_styles_watch")]
    pub watch: String,
    /// Extra import roots (project-relative); `~pkg` imports search these
    #[serde(default = "default_include_paths")]
    pub include_paths: Vec<PathBuf>,
    /// Browserslist query for vendor prefixes
    #[serde(default = "default_browsers")]
    pub browsers: String,
    /// Output directory
    #[serde(default = "default_styles_dest")]
    pub dest: PathBuf,
    /// Post-processing options
    #[serde(default)]
    pub minify: MinifyConfig,
}

fn default_styles_entry() -> String {
    "scss/style.scss".to_string()
}

fn default_styles_watch() -> String {
    "scss/**/*.scss".to_string()
}

fn default_include_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("node_modules")]
}

fn default_browsers() -> String {
    "> 1%, last 2 versions, Firefox ESR, Opera 12.1".to_string()
}

fn default_styles_dest() -> PathBuf {
    PathBuf::from("assets/css")
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            entry: default_styles_entry(),
            watch: default_styles_watch(),
            include_paths: default_include_paths(),
            browsers: default_browsers(),
            dest: default_styles_dest(),
            minify: MinifyConfig::default(),
        }
    }
}

/// Template pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Page templates; each becomes one HTML file
    #[serde(default = "default_pages")]
    pub pages: String,
    /// Files that trigger a rebuild in dev mode
    #[serde(default = "default_templates_watch")]
    pub watch: String,
    /// Directory absolute includes resolve from
    #[serde(default = "default_basedir")]
    pub basedir: PathBuf,
}

fn default_pages() -> String {
    "pug/pages/**/*.pug".to_string()
}

fn default_templates_watch() -> String {
    "pug/**/*.pug".to_string()
}

fn default_basedir() -> PathBuf {
    PathBuf::from("pug")
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self { pages: default_pages(), watch: default_templates_watch(), basedir: default_basedir() }
    }
}

/// Script pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Bundle entry module
    #[serde(default = "default_scripts_entry")]
    pub entry: String,
    /// Files that trigger a rebuild in dev mode
    #[serde(default = "default_scripts_watch")]
    pub watch: String,
    /// Bundle file name
    #[serde(default = "default_bundle")]
    pub bundle: String,
    /// Output directory
    #[serde(default = "default_scripts_dest")]
    pub dest: PathBuf,
}

fn default_scripts_entry() -> String {
    "js/index.js".to_string()
}

fn default_scripts_watch() -> String {
    "js/**/*.js".to_string()
}

fn default_bundle() -> String {
    "main.js".to_string()
}

fn default_scripts_dest() -> PathBuf {
    PathBuf::from("assets/js")
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            entry: default_scripts_entry(),
            watch: default_scripts_watch(),
            bundle: default_bundle(),
            dest: default_scripts_dest(),
        }
    }
}

/// Image pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Image sources (also the dev watch pattern)
    #[serde(default = "default_image_sources")]
    pub sources: String,
    /// JPEG re-encode quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Output directory
    #[serde(default = "default_images_dest")]
    pub dest: PathBuf,
}

fn default_image_sources() -> String {
    "img/**/*".to_string()
}

fn default_jpeg_quality() -> u8 {
    50
}

fn default_images_dest() -> PathBuf {
    PathBuf::from("assets/img")
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            sources: default_image_sources(),
            jpeg_quality: default_jpeg_quality(),
            dest: default_images_dest(),
        }
    }
}

/// Cache-busting token strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBustStrategy {
    /// Current time in milliseconds
    #[default]
    Timestamp,
}

/// Cache-busting settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheBustConfig {
    /// Token strategy
    #[serde(default)]
    pub strategy: CacheBustStrategy,
}

/// Dev server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// Watch mode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce window for file change events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear the terminal before each rebuild
    #[serde(default)]
    pub clear_screen: bool,
}

fn default_debounce_ms() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms(), clear_screen: false }
    }
}

/// Complete assetflow.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Project metadata (required)
    pub project: ProjectConfig,
    /// Public site settings
    #[serde(default)]
    pub site: SiteConfig,
    /// Stylesheets
    #[serde(default)]
    pub styles: StylesConfig,
    /// Page templates
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Scripts
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Images
    #[serde(default)]
    pub images: ImagesConfig,
    /// Cache busting
    #[serde(default)]
    pub cache_bust: CacheBustConfig,
    /// Dev server
    #[serde(default)]
    pub server: ServerConfig,
    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "images.jpeg_quality")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assetflow.toml: '{}' {}", self.field, self.message)
    }
}

impl FlowConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: &str| {
            errors.push(ConfigValidationError { field: field.to_string(), message: message.to_string() });
        };

        if self.project.name.is_empty() {
            fail("project.name", "must be a non-empty string");
        }

        if !(self.site.url.starts_with("http://") || self.site.url.starts_with("https://")) {
            fail("site.url", "must be an http(s) URL");
        }

        for (field, pattern) in [
            ("styles.entry", &self.styles.entry),
            ("styles.watch", &self.styles.watch),
            ("templates.pages", &self.templates.pages),
            ("templates.watch", &self.templates.watch),
            ("scripts.entry", &self.scripts.entry),
            ("scripts.watch", &self.scripts.watch),
            ("images.sources", &self.images.sources),
        ] {
            if pattern.is_empty() {
                fail(field, "must not be empty");
            } else if glob::Pattern::new(pattern).is_err() {
                fail(field, "is not a valid glob pattern");
            }
        }

        if self.scripts.bundle.is_empty() || self.scripts.bundle.contains('/') {
            fail("scripts.bundle", "must be a plain file name");
        }

        if !(1..=100).contains(&self.images.jpeg_quality) {
            fail("images.jpeg_quality", "must be between 1 and 100");
        }

        if self.watch.debounce_ms == 0 {
            fail("watch.debounce_ms", "must be a positive integer");
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parse() {
        let toml = r#"
[project]
name = "test-site"
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "test-site");
        assert_eq!(config.project.src, PathBuf::from("src"));
        assert_eq!(config.project.out, PathBuf::from("public"));
        assert_eq!(config.site.url, "https://example.com");
        assert_eq!(config.styles.include_paths, vec![PathBuf::from("node_modules")]);
        assert!(config.styles.minify.core);
        assert!(!config.styles.minify.zindex);
        assert_eq!(config.images.jpeg_quality, 50);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cache_bust.strategy, CacheBustStrategy::Timestamp);
        assert!(config.is_valid());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[project]
name = "full"
src = "assets"
out = "dist"

[site]
url = "https://my.site"

[styles]
entry = "css/main.scss"
include_paths = ["vendor", "node_modules"]
browsers = "last 1 version"

[styles.minify]
core = false
zindex = true
autoprefixer = false

[templates]
pages = "views/*.pug"
basedir = "views"

[scripts]
entry = "js/app.js"
bundle = "app.js"

[images]
sources = "img/*.png"
jpeg_quality = 80

[cache_bust]
strategy = "timestamp"

[server]
host = "0.0.0.0"
port = 8080

[watch]
debounce_ms = 250
clear_screen = true
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.out, PathBuf::from("dist"));
        assert_eq!(config.site.url, "https://my.site");
        assert_eq!(config.styles.include_paths.len(), 2);
        assert!(!config.styles.minify.core);
        assert!(config.styles.minify.zindex);
        assert_eq!(config.templates.basedir, PathBuf::from("views"));
        assert_eq!(config.templates.watch, "pug/**/*.pug");
        assert_eq!(config.scripts.bundle, "app.js");
        assert_eq!(config.images.jpeg_quality, 80);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.watch.debounce_ms, 250);
        assert!(config.watch.clear_screen);
        assert!(config.is_valid());
    }

    #[test]
    fn test_unknown_cache_bust_strategy() {
        let toml = r#"
[project]
name = "x"

[cache_bust]
strategy = "hash"
"#;
        assert!(toml::from_str::<FlowConfig>(toml).is_err());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let toml = r#"
[project]
name = ""

[site]
url = "example.com"

[images]
jpeg_quality = 0

[scripts]
bundle = "js/main.js"

[watch]
debounce_ms = 0
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["project.name", "site.url", "scripts.bundle", "images.jpeg_quality", "watch.debounce_ms"]
        );
    }

    #[test]
    fn test_validation_bad_glob() {
        let toml = r#"
[project]
name = "x"

[templates]
pages = "pug/[pages"
"#;
        let config: FlowConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().iter().any(|e| e.field == "templates.pages"));
    }
}
