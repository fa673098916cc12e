//! The default static-site recipe.
//!
//! Registers the site's task graph from a [`BuildContext`]:
//!
//! | task            | sources                  | output                         |
//! |-----------------|--------------------------|--------------------------------|
//! | `styles-*`      | `styles.entry`           | `assets/css/` (+ `.min`/`.map`)|
//! | `pug-*`         | `templates.pages`        | `*.html`                       |
//! | `scripts-*`     | `scripts.entry`          | `assets/js/` (+ `.min`/`.map`) |
//! | `images-*`      | `images.sources`         | `assets/img/`                  |
//! | `sitemap`       | `out/**/*.html` (paths)  | `sitemap.xml`                  |
//! | `cache`         | `out/**/*.html`          | HTML rewritten in place        |
//!
//! `build` runs the production compile tasks in parallel, then `cache` and
//! `sitemap` in parallel over the rendered pages; `dev-assets` runs the dev
//! variants. [`dev_bindings`] returns the watch bindings used by `dev`.

use glob::Pattern;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::CacheBustStrategy;
use crate::context::BuildContext;
use crate::pipeline::{Pipeline, Rename, Sources};
use crate::server::DevServer;
use crate::stages::source_map::is_map;
use crate::stages::{
    resolve_browsers, BundleScripts, CacheBust, CompileStyles, MinifyExt, MinifyScripts,
    OptimizeImages, OutputStyle, PostProcess, RenderTemplates, Sitemap,
};
use crate::task::{StageError, Task, TaskError, TaskRegistry};
use crate::watch::{WatchBinding, WatchError};

/// Production compile tasks, run in parallel by `assets-build`.
pub const BUILD_TASKS: [&str; 4] = ["styles-build", "pug-build", "scripts-build", "images-build"];

/// HTML post-processing tasks, run in parallel by `pages-build` once pages exist.
pub const POST_TASKS: [&str; 2] = ["cache", "sitemap"];

/// Development tasks run by `dev-assets`.
pub const DEV_TASKS: [&str; 4] = ["styles-dev", "pug-dev", "scripts-dev", "images-dev"];

/// Changed files matching this are injected instead of reloading the page.
pub const STYLE_SCOPE: &str = "**/*.css";

/// Error while assembling the site recipe.
#[derive(Debug, Error)]
pub enum SiteError {
    /// Registry rejected a task
    #[error(transparent)]
    Task(#[from] TaskError),
    /// Configuration could not be turned into a stage
    #[error("{0}")]
    Stage(#[from] StageError),
}

/// Build a registry holding the whole site recipe.
pub fn site_registry(ctx: &BuildContext) -> Result<TaskRegistry, SiteError> {
    let mut registry = TaskRegistry::new();
    register_tasks(ctx, &mut registry)?;
    Ok(registry)
}

/// Register the site recipe into an existing registry.
pub fn register_tasks(ctx: &BuildContext, registry: &mut TaskRegistry) -> Result<(), SiteError> {
    let config = ctx.config();
    let root = ctx.project_root();
    let browsers = if config.styles.minify.autoprefixer {
        resolve_browsers(&config.styles.browsers)?
    } else {
        None
    };

    // Styles
    let dev_style = if config.styles.minify.core { OutputStyle::Compressed } else { OutputStyle::Expanded };
    let styles_src = Sources::glob([ctx.src_pattern(&config.styles.entry)]);
    let css_dest = ctx.out_path(&config.styles.dest);
    registry.register(
        Task::leaf(
            "styles-dev",
            Pipeline::new("styles-dev", root, styles_src.clone())
                .pipe(
                    CompileStyles::new(config.styles.include_paths.clone())
                        .with_style(dev_style)
                        .autoprefix(browsers)
                        .with_source_map(true),
                )
                .dest(&css_dest),
        )
        .with_description("Compile stylesheets for development"),
    )?;
    registry.register(
        Task::leaf(
            "styles-build",
            Pipeline::new("styles-build", root, styles_src)
                .pipe(
                    CompileStyles::new(config.styles.include_paths.clone())
                        .with_style(OutputStyle::Expanded),
                )
                .pipe(PostProcess::new().autoprefix(browsers))
                .dest(&css_dest)
                .pipe(PostProcess::new().minify(true).zindex(config.styles.minify.zindex))
                .pipe(Rename::extname(".min.css"))
                .dest(&css_dest),
        )
        .with_description("Compile plain and minified stylesheets"),
    )?;

    // Templates
    let pages = Sources::glob([ctx.src_pattern(&config.templates.pages)]);
    let basedir = ctx.src_path(&config.templates.basedir);
    let html_dest = config.project.out.clone();
    for (id, pretty, description) in [
        ("pug-dev", true, "Render pages with indented HTML"),
        ("pug-build", false, "Render pages with compact HTML"),
    ] {
        registry.register(
            Task::leaf(
                id,
                Pipeline::new(id, root, pages.clone())
                    .pipe(RenderTemplates::new(&basedir).pretty(pretty))
                    .dest(&html_dest),
            )
            .with_description(description),
        )?;
    }

    // Scripts
    let entry = Sources::glob([ctx.src_pattern(&config.scripts.entry)]);
    let js_dest = ctx.out_path(&config.scripts.dest);
    for (id, ext, description) in [
        ("scripts-dev", MinifyExt::new(".min.js", ".js"), "Bundle scripts for development"),
        ("scripts-build", MinifyExt::new(".js", ".min.js"), "Bundle plain and minified scripts"),
    ] {
        registry.register(
            Task::leaf(
                id,
                Pipeline::new(id, root, entry.clone())
                    .pipe(BundleScripts::new(&config.scripts.bundle))
                    .pipe(MinifyScripts::new(ext))
                    .dest(&js_dest),
            )
            .with_description(description),
        )?;
    }

    // Images
    let images = Sources::glob([ctx.src_pattern(&config.images.sources)]);
    let img_dest = ctx.out_path(&config.images.dest);
    registry.register(
        Task::leaf("images-dev", Pipeline::new("images-dev", root, images.clone()).dest(&img_dest))
            .with_description("Copy images"),
    )?;
    registry.register(
        Task::leaf(
            "images-build",
            Pipeline::new("images-build", root, images)
                .pipe(OptimizeImages::new(config.images.jpeg_quality))
                .dest(&img_dest),
        )
        .with_description("Optimize images"),
    )?;

    // Output post-processing
    let html_out = ctx.out_pattern("**/*.html");
    registry.register(
        Task::leaf(
            "sitemap",
            Pipeline::new("sitemap", root, Sources::glob([html_out.clone()]).without_contents())
                .pipe(Sitemap::new(&config.site.url))
                .dest(&html_dest),
        )
        .with_description("Write sitemap.xml for the rendered pages"),
    )?;
    let stamper = match config.cache_bust.strategy {
        CacheBustStrategy::Timestamp => CacheBust::timestamp(),
    };
    registry.register(
        Task::leaf(
            "cache",
            Pipeline::new("cache", root, Sources::glob([html_out])).pipe(stamper).dest(&html_dest),
        )
        .with_description("Cache-bust script and stylesheet references"),
    )?;

    registry.register(
        Task::parallel("assets-build", BUILD_TASKS).with_description("Compile production assets"),
    )?;
    registry.register(
        Task::parallel("pages-build", POST_TASKS).with_description("Post-process rendered pages"),
    )?;
    registry.register(
        Task::sequential("build", ["assets-build", "pages-build"])
            .with_description("Run every production task"),
    )?;
    registry.register(
        Task::parallel("dev-assets", DEV_TASKS).with_description("Run every development task"),
    )?;

    Ok(())
}

/// Watch bindings for `dev`.
///
/// Style rebuilds inject the new stylesheets, script and template rebuilds
/// reload the page, image copies notify nobody. Without a server the
/// bindings only rebuild.
pub fn dev_bindings(
    ctx: &BuildContext,
    server: Option<Arc<DevServer>>,
) -> Result<Vec<WatchBinding>, WatchError> {
    let config = ctx.config();

    let mut styles = WatchBinding::new([ctx.src_pattern(&config.styles.watch)], "styles-dev")?;
    let mut scripts = WatchBinding::new([ctx.src_pattern(&config.scripts.watch)], "scripts-dev")?;
    let mut pages = WatchBinding::new([ctx.src_pattern(&config.templates.watch)], "pug-dev")?;
    let images = WatchBinding::new([ctx.src_pattern(&config.images.sources)], "images-dev")?;

    if let Some(server) = server {
        let scope = Pattern::new(STYLE_SCOPE)
            .map_err(|e| WatchError::InvalidPattern(STYLE_SCOPE.to_string(), e))?;
        let inject = Arc::clone(&server);
        styles = styles.with_hook(move |report| {
            let changed: Vec<PathBuf> =
                report.outputs.iter().filter(|p| !is_map(p)).cloned().collect();
            inject.reload(&changed, Some(&scope));
        });
        let reload = Arc::clone(&server);
        scripts = scripts.with_hook(move |_| {
            reload.reload(&[], None);
        });
        pages = pages.with_hook(move |_| {
            server.reload(&[], None);
        });
    }

    Ok(vec![styles, scripts, pages, images])
}

/// Directories the dev watcher observes.
pub fn watch_dirs(ctx: &BuildContext) -> Vec<PathBuf> {
    vec![ctx.src_dir()]
}
