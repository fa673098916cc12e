//! Stylesheet stages.
//!
//! [`CompileStyles`] turns `.scss` sources into plain CSS: it inlines
//! `@import`s (relative, `_partial`, include paths and `~package` imports from
//! `node_modules`), substitutes top-level `$variables`, drops `//` comments and
//! lets `lightningcss` flatten nesting and print the result. With
//! [`CompileStyles::with_source_map`] it also emits `<name>.css.map`, mapped
//! onto the entry file after imports are inlined.
//!
//! [`PostProcess`] is the post-processor step: vendor prefixing for a
//! browserslist query and optional minification.

use lightningcss::stylesheet::{MinifyOptions, ParserFlags, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Features, Targets};
use parcel_sourcemap::SourceMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::pipeline::{normalize, Asset, Stage, StageContext};
use crate::stages::source_map::{link, map_asset, LinkSyntax};
use crate::task::StageError;

const STAGE: &str = "styles";

/// Imports nested deeper than this are treated as runaway recursion.
const MAX_IMPORT_DEPTH: usize = 32;

/// CSS output formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputStyle {
    /// One declaration per line, indented
    #[default]
    Expanded,
    /// No optional whitespace
    Compressed,
}

/// Resolve a comma separated browserslist query (e.g. "> 1%, last 2 versions").
pub fn resolve_browsers(query: &str) -> Result<Option<Browsers>, StageError> {
    let parts: Vec<&str> = query.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Ok(None);
    }
    Browsers::from_browserslist(parts)
        .map_err(|e| StageError::new(STAGE, format!("invalid browser query '{}': {}", query, e)))
}

/// Compile `.scss` sources to CSS.
#[derive(Debug, Clone)]
pub struct CompileStyles {
    include_paths: Vec<PathBuf>,
    style: OutputStyle,
    browsers: Option<Browsers>,
    source_map: bool,
}

impl CompileStyles {
    /// Create a compiler; include paths are project-relative.
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths, style: OutputStyle::Expanded, browsers: None, source_map: false }
    }

    /// Set the output style.
    pub fn with_style(mut self, style: OutputStyle) -> Self {
        self.style = style;
        self
    }

    /// Add vendor prefixes needed by these browsers while compiling.
    pub fn autoprefix(mut self, browsers: Option<Browsers>) -> Self {
        self.browsers = browsers;
        self
    }

    /// Emit a `.map` file next to each stylesheet.
    pub fn with_source_map(mut self, enabled: bool) -> Self {
        self.source_map = enabled;
        self
    }

    fn compile(
        &self,
        asset: &Asset,
        ctx: &StageContext,
        map: Option<&mut SourceMap>,
    ) -> Result<String, StageError> {
        let include_paths: Vec<PathBuf> = self.include_paths.iter().map(|p| ctx.resolve(p)).collect();
        let origin = asset.origin();
        let base_dir = origin.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut seen = HashSet::new();
        let expanded = inline_imports(
            asset.text(STAGE)?,
            &origin,
            &base_dir,
            &include_paths,
            &mut seen,
            0,
        )?;
        let source = substitute_variables(&strip_line_comments(&expanded), &origin)?;

        let targets = Targets { browsers: self.browsers, include: Features::Nesting, ..Targets::default() };
        print_css(
            &source,
            &origin,
            targets,
            self.style == OutputStyle::Compressed,
            self.browsers.is_some(),
            map,
        )
    }
}

impl Stage for CompileStyles {
    fn name(&self) -> &str {
        STAGE
    }

    fn apply(&self, assets: Vec<Asset>, ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        let mut out = Vec::new();
        for asset in assets {
            // Partials are only compiled through imports
            let is_partial = asset
                .path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('_'))
                .unwrap_or(false);
            if is_partial {
                continue;
            }
            if !self.source_map {
                let css = self.compile(&asset, ctx, None)?;
                out.push(Asset { contents: css.into_bytes(), ..asset }.with_extension("css"));
                continue;
            }

            let mut map = SourceMap::new(&ctx.root().to_string_lossy());
            let css = self.compile(&asset, ctx, Some(&mut map))?;
            let mut compiled = Asset { contents: Vec::new(), ..asset }.with_extension("css");
            let map_file = map_asset(&compiled, &mut map, STAGE)?;
            let name = map_file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            compiled.contents = link(&css, &name, LinkSyntax::Css).into_bytes();
            out.push(compiled);
            out.push(map_file);
        }
        Ok(out)
    }
}

/// Vendor prefixing and minification of plain CSS.
#[derive(Debug, Clone, Default)]
pub struct PostProcess {
    minify: bool,
    zindex: bool,
    browsers: Option<Browsers>,
}

impl PostProcess {
    /// A post-processor that re-prints the CSS unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Minify output (the `core` option).
    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    /// Accept the `zindex` option. Z-index values are never rebased.
    pub fn zindex(mut self, zindex: bool) -> Self {
        self.zindex = zindex;
        self
    }

    /// Add vendor prefixes needed by these browsers.
    pub fn autoprefix(mut self, browsers: Option<Browsers>) -> Self {
        self.browsers = browsers;
        self
    }
}

impl Stage for PostProcess {
    fn name(&self) -> &str {
        "postcss"
    }

    fn apply(&self, assets: Vec<Asset>, _ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        if self.zindex {
            tracing::debug!("zindex rebasing requested; z-index values are left as written");
        }
        let targets = Targets { browsers: self.browsers, ..Targets::default() };
        assets
            .into_iter()
            .map(|asset| {
                let css =
                    print_css(asset.text("postcss")?, &asset.origin(), targets, self.minify, true, None)?;
                Ok(Asset { contents: css.into_bytes(), ..asset })
            })
            .collect()
    }
}

fn print_css(
    source: &str,
    origin: &Path,
    targets: Targets,
    minify: bool,
    transform: bool,
    mut map: Option<&mut SourceMap>,
) -> Result<String, StageError> {
    let source_index = match map.as_deref_mut() {
        Some(map) => {
            let index = map.add_source(&origin.to_string_lossy());
            map.set_source_content(index as usize, source)
                .map_err(|e| StageError::new(STAGE, e.to_string()).in_file(origin))?;
            index
        }
        None => 0,
    };
    let options = ParserOptions {
        filename: origin.display().to_string(),
        flags: ParserFlags::NESTING,
        source_index,
        ..ParserOptions::default()
    };

    let mut sheet = StyleSheet::parse(source, options).map_err(|e| {
        let err = StageError::new(STAGE, e.kind.to_string()).in_file(origin);
        match e.loc {
            Some(loc) => err.at_line(loc.line as usize + 1),
            None => err,
        }
    })?;

    if minify || transform {
        sheet
            .minify(MinifyOptions { targets, ..MinifyOptions::default() })
            .map_err(|e| StageError::new(STAGE, e.to_string()).in_file(origin))?;
    }

    let result = sheet
        .to_css(PrinterOptions { minify, targets, source_map: map, ..PrinterOptions::default() })
        .map_err(|e| StageError::new(STAGE, e.to_string()).in_file(origin))?;

    Ok(result.code)
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s+["']([^"']+)["']\s*;"#).expect("import pattern is valid")
    })
}

fn inline_imports(
    source: &str,
    file: &Path,
    base_dir: &Path,
    include_paths: &[PathBuf],
    seen: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<String, StageError> {
    if depth > MAX_IMPORT_DEPTH {
        return Err(StageError::new(STAGE, "imports nested too deeply").in_file(file));
    }

    let mut out = String::with_capacity(source.len());
    let mut last = 0;

    for caps in import_regex().captures_iter(source) {
        let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let spec = spec.as_str();
        out.push_str(&source[last..whole.start()]);
        last = whole.end();

        if is_remote(spec) {
            out.push_str(whole.as_str());
            continue;
        }

        let line = line_of(source, whole.start());
        let resolved = resolve_import(spec, base_dir, include_paths).ok_or_else(|| {
            StageError::new(STAGE, format!("Can't find stylesheet to import: '{}'", spec))
                .in_file(file)
                .at_line(line)
        })?;

        // Each file is inlined once, like Sass modules
        if !seen.insert(resolved.clone()) {
            continue;
        }

        let text = fs::read_to_string(&resolved).map_err(|e| {
            StageError::new(STAGE, format!("Failed to read import: {}", e)).in_file(&resolved)
        })?;
        let dir = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
        out.push_str(&inline_imports(&text, &resolved, &dir, include_paths, seen, depth + 1)?);
        out.push('\n');
    }

    out.push_str(&source[last..]);
    Ok(out)
}

/// 1-indexed line of a byte offset.
pub(crate) fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

fn is_remote(spec: &str) -> bool {
    spec.starts_with("http://") || spec.starts_with("https://") || spec.starts_with("//")
}

/// Find the file an `@import` refers to.
///
/// `~pkg/file` is looked up in include paths only; other specs are tried
/// relative to the importing file first.
fn resolve_import(spec: &str, base_dir: &Path, include_paths: &[PathBuf]) -> Option<PathBuf> {
    let (spec, dirs): (&str, Vec<&Path>) = match spec.strip_prefix('~') {
        Some(rest) => (rest, include_paths.iter().map(PathBuf::as_path).collect()),
        None => {
            let mut dirs = vec![base_dir];
            dirs.extend(include_paths.iter().map(PathBuf::as_path));
            (spec, dirs)
        }
    };

    let spec_path = Path::new(spec);
    let name = spec_path.file_name()?.to_string_lossy().into_owned();
    let parent = spec_path.parent().unwrap_or(Path::new(""));

    let mut candidates = vec![
        parent.join(format!("{}.scss", name)),
        parent.join(format!("_{}.scss", name)),
        parent.join(format!("{}.css", name)),
        parent.join(format!("_{}.css", name)),
        spec_path.join("_index.scss"),
        spec_path.join("index.scss"),
    ];
    if spec_path.extension().is_some() {
        candidates.insert(0, spec_path.to_path_buf());
        candidates.insert(1, parent.join(format!("_{}", name)));
    }

    dirs.iter()
        .flat_map(|dir| candidates.iter().map(move |c| normalize(&dir.join(c))))
        .find(|p| p.is_file())
}

/// Remove `//` line comments outside strings, `url(...)` tokens and schemes.
fn strip_line_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote: Option<char> = None;
    let mut in_block = false;
    let mut in_url = false;
    let mut prev = '\0';

    while let Some(c) = chars.next() {
        if in_block {
            out.push(c);
            if prev == '*' && c == '/' {
                in_block = false;
            }
            prev = c;
            continue;
        }
        if let Some(q) = quote {
            out.push(c);
            if c == q && prev != '\\' {
                quote = None;
            }
            prev = c;
            continue;
        }
        if in_url {
            match c {
                '"' | '\'' => quote = Some(c),
                ')' => in_url = false,
                _ => {}
            }
            out.push(c);
            prev = c;
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' if ends_with_url(&out) => in_url = true,
            '/' if chars.peek() == Some(&'*') => in_block = true,
            '/' if chars.peek() == Some(&'/') && prev != ':' => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
                prev = '\n';
                continue;
            }
            _ => {}
        }
        out.push(c);
        prev = c;
    }

    out
}

fn ends_with_url(out: &str) -> bool {
    let bytes = out.as_bytes();
    bytes.len() >= 3 && bytes[bytes.len() - 3..].eq_ignore_ascii_case(b"url")
}

fn variable_decl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*\$([A-Za-z_][\w-]*)[ \t]*:[ \t]*([^;]+);[ \t]*\n?")
            .expect("variable pattern is valid")
    })
}

fn variable_use_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z_][\w-]*)").expect("variable pattern is valid"))
}

/// Substitute top-level `$name: value;` variables.
fn substitute_variables(source: &str, origin: &Path) -> Result<String, StageError> {
    let mut vars: HashMap<String, String> = HashMap::new();
    for caps in variable_decl_regex().captures_iter(source) {
        let value = caps[2].trim();
        let is_default = value.ends_with("!default");
        let value = value.trim_end_matches("!default").trim();
        let value = resolve_variable_refs(value, &vars);
        if is_default && vars.contains_key(&caps[1]) {
            continue;
        }
        vars.insert(caps[1].to_string(), value);
    }

    // Declarations keep their line break so later lines keep their numbers
    let body = variable_decl_regex().replace_all(source, |caps: &regex::Captures| {
        if caps[0].ends_with('\n') { "\n" } else { "" }
    });
    if let Some(caps) = variable_use_regex().captures_iter(&body).find(|c| !vars.contains_key(&c[1])) {
        let line = line_of(&body, caps.get(0).map(|m| m.start()).unwrap_or(0));
        return Err(StageError::new(STAGE, format!("Undefined variable: ${}", &caps[1]))
            .in_file(origin)
            .at_line(line));
    }

    Ok(resolve_variable_refs(&body, &vars))
}

fn resolve_variable_refs(text: &str, vars: &HashMap<String, String>) -> String {
    variable_use_regex()
        .replace_all(text, |caps: &regex::Captures| {
            vars.get(&caps[1]).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
