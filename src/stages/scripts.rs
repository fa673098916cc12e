//! Script stages.
//!
//! [`BundleScripts`] walks the module graph from an entry file and emits a
//! single self-executing bundle. Both `require()` and `import`/`export`
//! statements are understood; relative specifiers resolve against the
//! importing file, bare specifiers against `node_modules` (honouring
//! `package.json` `browser`/`main`). The bundle links a `.map` file that maps
//! each module line back to its source file.
//!
//! [`MinifyScripts`] emits an unminified and a minified copy of every script
//! under configurable suffixes. A bundle map follows the unminified copy.

use parcel_sourcemap::{OriginalLocation, SourceMap};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::pipeline::{normalize, Asset, Stage, StageContext};
use crate::stages::source_map::{is_map, link, map_asset, map_path, LinkSyntax};
use crate::stages::styles::line_of;
use crate::task::StageError;

const STAGE: &str = "scripts";

/// Bundle an entry script and its dependencies into one file.
#[derive(Debug, Clone)]
pub struct BundleScripts {
    output: String,
}

impl BundleScripts {
    /// Create a bundler writing `output` (e.g. `main.js`).
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into() }
    }
}

impl Stage for BundleScripts {
    fn name(&self) -> &str {
        STAGE
    }

    fn apply(&self, assets: Vec<Asset>, ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        let mut out = Vec::new();
        for asset in assets {
            let mut graph = ModuleGraph { root: ctx.root().to_path_buf(), modules: vec![], ids: HashMap::new() };
            let entry = asset.origin();
            graph.add(&entry, asset.text(STAGE)?.to_string())?;
            tracing::debug!(entry = %entry.display(), modules = graph.modules.len(), "bundled scripts");

            let path = match asset.path.parent() {
                Some(dir) => dir.join(&self.output),
                None => PathBuf::from(&self.output),
            };
            let (code, mut map) = graph.emit()?;
            let mut bundle = Asset { path, source: asset.source, contents: Vec::new() };
            let map_file = map_asset(&bundle, &mut map, STAGE)?;
            bundle.contents = link(&code, &file_name(&map_file.path), LinkSyntax::Js).into_bytes();
            out.push(bundle);
            out.push(map_file);
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct Module {
    path: PathBuf,
    source: String,
    code: String,
    /// Lines added before the first source line
    prelude: usize,
}

struct ModuleGraph {
    root: PathBuf,
    modules: Vec<Module>,
    ids: HashMap<PathBuf, usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    #[serde(default)]
    browser: Option<serde_json::Value>,
    #[serde(default)]
    main: Option<String>,
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^([ \t]*)import\s+(?:([\w$]+)\s*,?\s*)?(?:\{([^}]*)\}\s*|\*\s+as\s+([\w$]+)\s*)?(?:from\s+)?["']([^"']+)["'];?"#,
        )
        .expect("import pattern is valid")
    })
}

fn require_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\brequire\(\s*["']([^"']+)["']\s*\)"#).expect("require pattern is valid")
    })
}

fn export_decl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)export\s+(const|let|var|function\*?|class|async\s+function)\s+([\w$]+)")
            .expect("export pattern is valid")
    })
}

fn export_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)export\s*\{([^}]*)\}\s*;?").expect("export pattern is valid")
    })
}

fn export_default_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)export\s+default\s+").expect("export pattern is valid")
    })
}

impl ModuleGraph {
    /// Add a module (and everything it imports); returns its id.
    fn add(&mut self, path: &Path, source: String) -> Result<usize, StageError> {
        let path = normalize(path);
        if let Some(&id) = self.ids.get(&path) {
            return Ok(id);
        }
        let id = self.modules.len();
        self.ids.insert(path.clone(), id);
        self.modules.push(Module { path: path.clone(), source: String::new(), code: String::new(), prelude: 0 });

        let (code, prelude) = if path.extension().map(|e| e == "json").unwrap_or(false) {
            (format!("module.exports = {};", source.trim()), 0)
        } else {
            self.transform(&path, &source)?
        };
        let module = &mut self.modules[id];
        module.code = code;
        module.prelude = prelude;
        module.source = source;
        Ok(id)
    }

    fn require(&mut self, spec: &str, from: &Path, source: &str, offset: usize) -> Result<usize, StageError> {
        let resolved = self.resolve(spec, from).ok_or_else(|| {
            StageError::new(STAGE, format!("Cannot find module '{}'", spec))
                .in_file(from)
                .at_line(line_of(source, offset))
        })?;
        let text = fs::read_to_string(&resolved).map_err(|e| {
            StageError::new(STAGE, format!("Failed to read module: {}", e)).in_file(&resolved)
        })?;
        self.add(&resolved, text)
    }

    /// Rewrite a module body; returns the code and its prelude line count.
    fn transform(&mut self, path: &Path, source: &str) -> Result<(String, usize), StageError> {
        let mut failure: Option<StageError> = None;
        let mut esm = false;

        let code = import_regex()
            .replace_all(source, |caps: &Captures| {
                esm = true;
                let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
                match self.require(&caps[5], path, source, offset) {
                    Ok(id) => import_statement(caps, id),
                    Err(e) => {
                        failure.get_or_insert(e);
                        String::new()
                    }
                }
            })
            .into_owned();
        if let Some(e) = failure.take() {
            return Err(e);
        }

        let code = require_regex()
            .replace_all(&code, |caps: &Captures| {
                let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
                match self.require(&caps[1], path, &code, offset) {
                    Ok(id) => format!("__require({})", id),
                    Err(e) => {
                        failure.get_or_insert(e);
                        String::new()
                    }
                }
            })
            .into_owned();
        if let Some(e) = failure.take() {
            return Err(e);
        }

        let mut exported: Vec<(String, String)> = Vec::new();
        let code = export_decl_regex()
            .replace_all(&code, |caps: &Captures| {
                exported.push((caps[3].to_string(), caps[3].to_string()));
                format!("{}{} {}", &caps[1], &caps[2], &caps[3])
            })
            .into_owned();
        let code = export_list_regex()
            .replace_all(&code, |caps: &Captures| {
                for item in caps[2].split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    match item.split_once(" as ") {
                        Some((local, name)) => exported.push((name.trim().to_string(), local.trim().to_string())),
                        None => exported.push((item.to_string(), item.to_string())),
                    }
                }
                caps[1].to_string()
            })
            .into_owned();
        let code = export_default_regex()
            .replace_all(&code, |caps: &Captures| {
                esm = true;
                format!("{}exports[\"default\"] = ", &caps[1])
            })
            .into_owned();

        let mut out = String::new();
        let mut prelude = 0;
        if esm || !exported.is_empty() {
            out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
            prelude = 1;
        }
        out.push_str(code.trim_end());
        out.push('\n');
        for (name, local) in exported {
            let _ = writeln!(out, "exports.{} = {};", name, local);
        }
        Ok((out, prelude))
    }

    fn resolve(&self, spec: &str, from: &Path) -> Option<PathBuf> {
        let dir = from.parent().unwrap_or(Path::new(""));
        if spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/') {
            return resolve_file(&dir.join(spec));
        }

        let (package, subpath) = split_package(spec);
        let mut current = Some(dir);
        while let Some(d) = current {
            let pkg_dir = d.join("node_modules").join(package);
            if pkg_dir.is_dir() {
                return match subpath {
                    Some(sub) => resolve_file(&pkg_dir.join(sub)),
                    None => resolve_package(&pkg_dir),
                };
            }
            if d == self.root {
                break;
            }
            current = d.parent();
        }
        None
    }

    fn emit(&self) -> Result<(String, SourceMap), StageError> {
        let mut map = SourceMap::new(&self.root.to_string_lossy());
        let mut out = String::from(
            "(function () {\n\
             var __cache = {};\n\
             function __default(m) { return m && m.__esModule ? m[\"default\"] : m; }\n\
             function __require(id) {\n\
             if (__cache[id]) return __cache[id].exports;\n\
             var module = (__cache[id] = { exports: {} });\n\
             __modules[id].call(module.exports, module, module.exports);\n\
             return module.exports;\n\
             }\n\
             var __modules = [\n",
        );
        for module in &self.modules {
            let rel = module.path.strip_prefix(&self.root).unwrap_or(&module.path);
            let _ = writeln!(out, "// {}", rel.display());
            out.push_str("function (module, exports) {\n");

            let source = map.add_source(&module.path.to_string_lossy());
            map.set_source_content(source as usize, &module.source).map_err(|e| {
                StageError::new(STAGE, format!("Failed to map module: {}", e)).in_file(&module.path)
            })?;
            let first_line = out.matches('\n').count();
            let source_lines = module.source.lines().count();
            for generated in 0..module.code.lines().count() {
                let Some(original) = generated.checked_sub(module.prelude).filter(|l| *l < source_lines) else {
                    continue;
                };
                map.add_mapping(
                    (first_line + generated) as u32,
                    0,
                    Some(OriginalLocation::new(original as u32, 0, source, None)),
                );
            }

            out.push_str(&module.code);
            out.push_str("},\n");
        }
        out.push_str("];\n__require(0);\n})();\n");
        Ok((out, map))
    }
}

fn import_statement(caps: &Captures, id: usize) -> String {
    let indent = &caps[1];
    let mut parts = Vec::new();
    if let Some(default) = caps.get(2) {
        parts.push(format!("const {} = __default(__require({}));", default.as_str(), id));
    }
    if let Some(named) = caps.get(3) {
        let bindings: Vec<String> = named
            .as_str()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s.split_once(" as ") {
                Some((name, local)) => format!("{}: {}", name.trim(), local.trim()),
                None => s.to_string(),
            })
            .collect();
        parts.push(format!("const {{ {} }} = __require({});", bindings.join(", "), id));
    }
    if let Some(ns) = caps.get(4) {
        parts.push(format!("const {} = __require({});", ns.as_str(), id));
    }
    if parts.is_empty() {
        parts.push(format!("__require({});", id));
    }
    format!("{}{}", indent, parts.join(" "))
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn split_package(spec: &str) -> (&str, Option<&str>) {
    let split_at = if spec.starts_with('@') {
        spec.match_indices('/').nth(1).map(|(i, _)| i)
    } else {
        spec.find('/')
    };
    match split_at {
        Some(i) => (&spec[..i], Some(&spec[i + 1..])),
        None => (spec, None),
    }
}

fn resolve_file(path: &Path) -> Option<PathBuf> {
    let path = normalize(path);
    let mut candidates = vec![path.clone()];
    for ext in ["js", "json", "mjs"] {
        let mut p = path.clone().into_os_string();
        p.push(format!(".{}", ext));
        candidates.push(PathBuf::from(p));
    }
    candidates.push(path.join("index.js"));
    candidates.into_iter().find(|p| p.is_file())
}

fn resolve_package(dir: &Path) -> Option<PathBuf> {
    let manifest = fs::read_to_string(dir.join("package.json"))
        .ok()
        .and_then(|text| serde_json::from_str::<PackageJson>(&text).ok())
        .unwrap_or_default();

    let browser = match manifest.browser {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    };
    browser
        .or(manifest.main)
        .and_then(|entry| resolve_file(&dir.join(entry)))
        .or_else(|| resolve_file(&dir.join("index.js")))
}

/// Output suffixes for [`MinifyScripts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinifyExt {
    /// Suffix of the unminified copy
    pub src: String,
    /// Suffix of the minified copy
    pub min: String,
}

impl MinifyExt {
    /// Create suffixes (each including the leading dot).
    pub fn new(src: impl Into<String>, min: impl Into<String>) -> Self {
        Self { src: src.into(), min: min.into() }
    }
}

/// Emit unminified and minified copies of each script.
#[derive(Debug, Clone)]
pub struct MinifyScripts {
    ext: MinifyExt,
}

impl MinifyScripts {
    /// Create a minifier with the given suffixes.
    pub fn new(ext: MinifyExt) -> Self {
        Self { ext }
    }
}

impl Stage for MinifyScripts {
    fn name(&self) -> &str {
        "minify"
    }

    fn apply(&self, assets: Vec<Asset>, _ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        let (mut maps, scripts): (Vec<Asset>, Vec<Asset>) = assets.into_iter().partition(|a| is_map(&a.path));
        let mut out = Vec::with_capacity(scripts.len() * 3);
        for asset in scripts {
            let map = maps
                .iter()
                .position(|m| m.path == map_path(&asset.path))
                .map(|i| maps.remove(i));
            let minified = minify_js(asset.text("minify")?).map_err(|(line, msg)| {
                StageError::new("minify", msg).in_file(asset.origin()).at_line(line)
            })?;
            let stem = asset
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut min = asset.clone();
            min.path.set_file_name(format!("{}{}", stem, self.ext.min));
            min.contents = minified.into_bytes();

            let mut src = asset;
            src.path.set_file_name(format!("{}{}", stem, self.ext.src));

            // Line-based maps stay valid only for the unminified copy
            let map = match map {
                Some(mut map) => {
                    map.path = map_path(&src.path);
                    src.contents = link(src.text("minify")?, &file_name(&map.path), LinkSyntax::Js).into_bytes();
                    Some(map)
                }
                None => None,
            };

            out.push(src);
            out.push(min);
            out.extend(map);
        }
        out.extend(maps);
        Ok(out)
    }
}

const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "void", "throw", "new", "delete",
    "instanceof", "yield", "await",
];

fn is_tight(c: char) -> bool {
    matches!(c, '{' | '}' | '(' | ')' | '[' | ']' | ';' | ',' | ':' | '=' | '<' | '>' | '!' | '?' | '&' | '|' | '*')
}

fn regex_allowed(out: &str) -> bool {
    let trimmed = out.trim_end();
    match trimmed.chars().last() {
        None => true,
        Some(c) if "(,=:[!&|?{};+-*%<>~^".contains(c) => true,
        Some(c) if c.is_alphanumeric() || c == '_' || c == '$' => {
            let word: String = trimmed
                .chars()
                .rev()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            REGEX_PREFIX_KEYWORDS.contains(&word.as_str())
        }
        _ => false,
    }
}

/// Strip comments and redundant whitespace, keeping literals intact.
///
/// Line breaks are kept where automatic semicolon insertion could depend on
/// them. Errors carry the 1-indexed line of the unterminated literal.
pub fn minify_js(source: &str) -> Result<String, (usize, String)> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut line = 1;
    let mut pending_space = false;
    let mut pending_newline = false;

    let flush = |out: &mut String, next: char, space: &mut bool, newline: &mut bool| {
        let prev = out.chars().last();
        if *newline {
            let joinable = matches!(prev, None | Some('{' | '(' | '[' | ',' | ';' | '=' | ':'))
                || matches!(next, '}' | ')' | ']' | ',' | '.' | ';');
            if !joinable {
                out.push('\n');
            }
        } else if *space {
            if let Some(p) = prev {
                if !is_tight(p) && !is_tight(next) {
                    out.push(' ');
                }
            }
        }
        *space = false;
        *newline = false;
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                pending_newline = true;
                i += 1;
            }
            c if c.is_whitespace() => {
                pending_space = true;
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start_line = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err((start_line, "unterminated comment".to_string())),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            pending_newline = true;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
                pending_space = true;
            }
            '"' | '\'' | '`' => {
                flush(&mut out, c, &mut pending_space, &mut pending_newline);
                let start_line = line;
                out.push(c);
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err((start_line, "unterminated string literal".to_string())),
                        Some('\\') => {
                            out.push('\\');
                            if let Some(&escaped) = chars.get(i + 1) {
                                out.push(escaped);
                            }
                            i += 2;
                        }
                        Some('\n') if c != '`' => {
                            return Err((start_line, "unterminated string literal".to_string()))
                        }
                        Some(&q) if q == c => {
                            out.push(q);
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            if other == '\n' {
                                line += 1;
                            }
                            out.push(other);
                            i += 1;
                        }
                    }
                }
            }
            '/' if regex_allowed(&out) => {
                flush(&mut out, c, &mut pending_space, &mut pending_newline);
                let start_line = line;
                let mut in_class = false;
                out.push('/');
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return Err((start_line, "unterminated regular expression".to_string()))
                        }
                        Some('\\') => {
                            out.push('\\');
                            if let Some(&escaped) = chars.get(i + 1) {
                                out.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            out.push(ch);
                            i += 1;
                            match ch {
                                '[' => in_class = true,
                                ']' => in_class = false,
                                '/' if !in_class => break,
                                _ => {}
                            }
                        }
                    }
                }
            }
            _ => {
                flush(&mut out, c, &mut pending_space, &mut pending_newline);
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minify_strips_comments_and_whitespace() {
        let src = "// header\nfunction add(a, b) {\n  /* sum */\n  return a + b;\n}\n";
        assert_eq!(minify_js(src).unwrap(), "function add(a,b){return a + b;}");
    }

    #[test]
    fn test_minify_keeps_literals() {
        let src = "var s = \"a  // not a comment\";\nvar r = /\\/\\/ +x/g;\nvar t = `x  ${s}`;";
        assert_eq!(
            minify_js(src).unwrap(),
            "var s=\"a  // not a comment\";var r=/\\/\\/ +x/g;var t=`x  ${s}`;"
        );
    }

    #[test]
    fn test_minify_keeps_newline_between_statements() {
        assert_eq!(minify_js("a = 1\nb = 2").unwrap(), "a=1\nb=2");
    }

    #[test]
    fn test_minify_reports_unterminated_string() {
        let err = minify_js("var a = 1;\nvar b = 'oops;\n").unwrap_err();
        assert_eq!(err.0, 2);
    }

    #[test]
    fn test_minify_emits_both_copies() {
        let mut ctx = StageContext::new("/nonexistent");
        let out = MinifyScripts::new(MinifyExt::new(".js", ".min.js"))
            .apply(vec![Asset::new("main.js", "var a = 1;")], &mut ctx)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, PathBuf::from("main.js"));
        assert_eq!(out[0].contents, b"var a = 1;");
        assert_eq!(out[1].path, PathBuf::from("main.min.js"));
        assert_eq!(out[1].contents, b"var a=1;");
    }

    #[test]
    fn test_split_package() {
        assert_eq!(split_package("lodash"), ("lodash", None));
        assert_eq!(split_package("lodash/fp/map"), ("lodash", Some("fp/map")));
        assert_eq!(split_package("@scope/pkg/x"), ("@scope/pkg", Some("x")));
    }

    fn bundle(root: &Path, entry: &Path) -> Result<String, StageError> {
        let mut ctx = StageContext::new(root);
        let asset = Asset::new("index.js", fs::read(entry).unwrap()).with_source(entry);
        let out = BundleScripts::new("main.js").apply(vec![asset], &mut ctx)?;
        assert_eq!(out[0].path, PathBuf::from("main.js"));
        Ok(String::from_utf8(out[0].contents.clone()).unwrap())
    }

    #[test]
    fn test_bundle_resolves_relative_and_packages() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/js/lib")).unwrap();
        fs::create_dir_all(root.join("node_modules/greet/dist")).unwrap();
        fs::write(root.join("node_modules/greet/package.json"), r#"{"main": "dist/greet.js"}"#).unwrap();
        fs::write(root.join("node_modules/greet/dist/greet.js"), "module.exports = function (n) { return 'hi ' + n; };").unwrap();
        fs::write(root.join("src/js/lib/math.js"), "export const two = 2;\nexport default function double(x) { return x * two; }\n").unwrap();
        let entry = root.join("src/js/index.js");
        fs::write(&entry, "import double, { two } from './lib/math';\nconst greet = require('greet');\nconsole.log(greet(double(two)));\n").unwrap();

        let js = bundle(root, &entry).unwrap();

        assert!(js.contains("// src/js/index.js"));
        assert!(js.contains("// src/js/lib/math.js"));
        assert!(js.contains("// node_modules/greet/dist/greet.js"));
        assert!(js.contains("const double = __default(__require(1)); const { two } = __require(1);"));
        assert!(js.contains("const greet = __require(2);"));
        assert!(js.contains("const two = 2;"));
        assert!(js.contains("exports.two = two;"));
        assert!(js.contains("exports[\"default\"] = function double(x)"));
        assert!(!js.contains("import "));
    }

    #[test]
    fn test_bundle_shares_module_instances() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/js")).unwrap();
        fs::write(root.join("src/js/a.js"), "require('./shared');").unwrap();
        fs::write(root.join("src/js/shared.js"), "module.exports = {};").unwrap();
        let entry = root.join("src/js/index.js");
        fs::write(&entry, "require('./a');\nrequire('./shared');\n").unwrap();

        let js = bundle(root, &entry).unwrap();
        assert_eq!(js.matches("// src/js/shared.js").count(), 1);
    }

    #[test]
    fn test_bundle_links_module_map() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/js/lib")).unwrap();
        fs::write(root.join("src/js/lib/greet.js"), "export function greet(n) {\n  return 'hi ' + n;\n}\n").unwrap();
        let entry = root.join("src/js/index.js");
        fs::write(&entry, "import { greet } from './lib/greet';\nconsole.log(greet('x'));\n").unwrap();

        let mut ctx = StageContext::new(root);
        let asset = Asset::new("index.js", fs::read(&entry).unwrap()).with_source(&entry);
        let out = BundleScripts::new("main.js").apply(vec![asset], &mut ctx).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[1].path, PathBuf::from("main.js.map"));
        let js = String::from_utf8(out[0].contents.clone()).unwrap();
        assert!(js.trim_end().ends_with("//# sourceMappingURL=main.js.map"));

        let map: serde_json::Value = serde_json::from_slice(&out[1].contents).unwrap();
        let sources: Vec<&str> = map["sources"].as_array().unwrap().iter().map(|s| s.as_str().unwrap()).collect();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].ends_with("index.js"));
        assert!(sources[1].ends_with("greet.js"));
        assert!(map["sourcesContent"][1].as_str().unwrap().contains("return 'hi '"));
        assert!(map["mappings"].as_str().unwrap().contains(';'));
    }

    #[test]
    fn test_minify_moves_map_to_unminified_copy() {
        let mut ctx = StageContext::new("/nonexistent");
        let assets = || {
            vec![
                Asset::new("main.js", "var a = 1;\n//# sourceMappingURL=main.js.map\n"),
                Asset::new("main.js.map", "{\"version\":3}"),
            ]
        };

        let build = MinifyScripts::new(MinifyExt::new(".js", ".min.js")).apply(assets(), &mut ctx).unwrap();
        let paths: Vec<_> = build.iter().map(|a| a.path.clone()).collect();
        assert_eq!(paths, [PathBuf::from("main.js"), PathBuf::from("main.min.js"), PathBuf::from("main.js.map")]);
        assert_eq!(build[1].contents, b"var a=1;");

        let dev = MinifyScripts::new(MinifyExt::new(".min.js", ".js")).apply(assets(), &mut ctx).unwrap();
        assert_eq!(dev[0].path, PathBuf::from("main.min.js"));
        assert_eq!(dev[0].contents, b"var a = 1;\n//# sourceMappingURL=main.min.js.map\n");
        assert_eq!(dev[2].path, PathBuf::from("main.min.js.map"));
    }

    #[test]
    fn test_bundle_missing_module() {
        let temp = TempDir::new().unwrap();
        let entry = temp.path().join("index.js");
        fs::write(&entry, "var a = 1;\nvar b = require('./nope');\n").unwrap();

        let err = bundle(temp.path(), &entry).unwrap_err();
        assert!(err.message.contains("./nope"));
        assert_eq!(err.line, Some(2));
    }
}
