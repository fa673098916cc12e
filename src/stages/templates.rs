//! Indentation-based HTML templates.
//!
//! Supports the subset of pug the site pages use:
//!
//! - `doctype html`
//! - tags with `#id`, `.class` and `(attr="value", flag)` attributes
//! - inline text, piped `| text`, and `tag.` text blocks
//! - block expansion (`li: a(href="/") Home`)
//! - `//` comments (kept) and `//-` comments (dropped)
//! - `include` of templates or raw files, `extends` with `block`,
//!   `block append` and `block prepend`
//!
//! Paths starting with `/` are resolved from the base directory, others from
//! the including file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::{normalize, Asset, Stage, StageContext};
use crate::task::StageError;

const STAGE: &str = "templates";

/// Templates nested deeper than this are treated as runaway recursion.
const MAX_INCLUDE_DEPTH: usize = 16;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Render `.pug` templates to `.html`.
#[derive(Debug, Clone)]
pub struct RenderTemplates {
    basedir: PathBuf,
    pretty: bool,
}

impl RenderTemplates {
    /// Create a renderer; `basedir` is project-relative.
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self { basedir: basedir.into(), pretty: true }
    }

    /// Indented (`true`) or compact (`false`) output.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Stage for RenderTemplates {
    fn name(&self) -> &str {
        STAGE
    }

    fn apply(&self, assets: Vec<Asset>, ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        let loader = Loader { basedir: ctx.resolve(&self.basedir) };
        assets
            .into_iter()
            .map(|asset| {
                let origin = asset.origin();
                let nodes = loader.load_source(asset.text(STAGE)?, &origin, 0)?;
                let html = render(&nodes, self.pretty);
                Ok(Asset { contents: html.into_bytes(), ..asset }.with_extension("html"))
            })
            .collect()
    }
}

/// Render a template string without a pipeline (includes resolve from `basedir`).
pub fn render_str(source: &str, basedir: &Path, pretty: bool) -> Result<String, StageError> {
    let loader = Loader { basedir: basedir.to_path_buf() };
    let nodes = loader.load_source(source, &basedir.join("<inline>"), 0)?;
    Ok(render(&nodes, pretty))
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Doctype(String),
    Element { tag: String, attrs: Vec<(String, Option<String>)>, children: Vec<Node>, void: bool },
    Text(String),
    Comment(String),
    Block { name: String, mode: BlockMode, children: Vec<Node> },
    Extends(String, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockMode {
    Replace,
    Append,
    Prepend,
}

/// A source line with its indented children.
#[derive(Debug)]
struct Line {
    number: usize,
    text: String,
    children: Vec<Line>,
}

impl Line {
    /// Children as raw text, keeping relative indentation.
    fn raw_children(&self, out: &mut Vec<String>, depth: usize) {
        for child in &self.children {
            out.push(format!("{}{}", "  ".repeat(depth), child.text));
            child.raw_children(out, depth + 1);
        }
    }
}

fn parse_lines(source: &str) -> Vec<Line> {
    // (indent, line) stack of open parents
    let mut roots: Vec<Line> = Vec::new();
    let mut stack: Vec<(usize, Line)> = Vec::new();

    fn attach(stack: &mut Vec<(usize, Line)>, roots: &mut Vec<Line>, line: Line) {
        match stack.last_mut() {
            Some((_, parent)) => parent.children.push(line),
            None => roots.push(line),
        }
    }

    for (idx, raw) in source.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let indent = raw.len() - raw.trim_start().len();
        let line = Line { number: idx + 1, text: raw.trim().to_string(), children: vec![] };

        while let Some((top, _)) = stack.last() {
            if *top < indent {
                break;
            }
            if let Some((_, done)) = stack.pop() {
                attach(&mut stack, &mut roots, done);
            }
        }
        stack.push((indent, line));
    }

    while let Some((_, done)) = stack.pop() {
        attach(&mut stack, &mut roots, done);
    }
    roots
}

struct Loader {
    basedir: PathBuf,
}

impl Loader {
    fn load_source(&self, source: &str, file: &Path, depth: usize) -> Result<Vec<Node>, StageError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(StageError::new(STAGE, "includes nested too deeply").in_file(file));
        }
        let nodes = self.build(&parse_lines(source), file, depth)?;

        let parent = nodes.iter().find_map(|n| match n {
            Node::Extends(path, line) => Some((path.clone(), *line)),
            _ => None,
        });
        match parent {
            Some((path, line)) => {
                let layout_path = self.resolve(&path, file);
                let layout = self.read(&layout_path, file, line)?;
                let mut layout_nodes = self.load_source(&layout, &layout_path, depth + 1)?;
                let overrides: Vec<Node> =
                    nodes.into_iter().filter(|n| matches!(n, Node::Block { .. })).collect();
                for block in overrides {
                    apply_block(&mut layout_nodes, block);
                }
                Ok(layout_nodes)
            }
            None => Ok(nodes),
        }
    }

    fn resolve(&self, path: &str, from: &Path) -> PathBuf {
        let mut target = match path.strip_prefix('/') {
            Some(rest) => self.basedir.join(rest),
            None => from.parent().unwrap_or(Path::new("")).join(path),
        };
        if target.extension().is_none() {
            target.set_extension("pug");
        }
        normalize(&target)
    }

    fn read(&self, path: &Path, from: &Path, line: usize) -> Result<String, StageError> {
        fs::read_to_string(path).map_err(|e| {
            StageError::new(STAGE, format!("Failed to read '{}': {}", path.display(), e))
                .in_file(from)
                .at_line(line)
        })
    }

    fn build(&self, lines: &[Line], file: &Path, depth: usize) -> Result<Vec<Node>, StageError> {
        let mut nodes = Vec::new();
        for line in lines {
            self.build_line(line, file, depth, &mut nodes)?;
        }
        Ok(nodes)
    }

    fn build_line(
        &self,
        line: &Line,
        file: &Path,
        depth: usize,
        nodes: &mut Vec<Node>,
    ) -> Result<(), StageError> {
        let text = line.text.as_str();
        let err = |msg: String| StageError::new(STAGE, msg).in_file(file).at_line(line.number);

        if text.starts_with("//-") {
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("//") {
            let mut body = vec![rest.trim().to_string()];
            line.raw_children(&mut body, 0);
            body.retain(|l| !l.is_empty());
            nodes.push(Node::Comment(body.join(" ")));
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix('|') {
            nodes.push(Node::Text(rest.strip_prefix(' ').unwrap_or(rest).to_string()));
            return Ok(());
        }
        if text.starts_with('<') {
            nodes.push(Node::Text(text.to_string()));
            nodes.extend(self.build(&line.children, file, depth)?);
            return Ok(());
        }

        let (keyword, arg) = text.split_once(' ').unwrap_or((text, ""));
        let arg = arg.trim();
        match keyword {
            "doctype" => {
                nodes.push(Node::Doctype(if arg.is_empty() { "html".into() } else { arg.into() }));
                return Ok(());
            }
            "extends" => {
                nodes.push(Node::Extends(arg.to_string(), line.number));
                return Ok(());
            }
            "include" => {
                if arg.is_empty() {
                    return Err(err("include requires a path".into()));
                }
                let path = self.resolve(arg, file);
                let contents = self.read(&path, file, line.number)?;
                if path.extension().map(|e| e == "pug").unwrap_or(false) {
                    nodes.extend(self.load_source(&contents, &path, depth + 1)?);
                } else {
                    nodes.push(Node::Text(contents.trim_end().to_string()));
                }
                return Ok(());
            }
            "block" | "append" | "prepend" => {
                let (mode, name) = match (keyword, arg.split_once(' ')) {
                    ("append", _) => (BlockMode::Append, arg),
                    ("prepend", _) => (BlockMode::Prepend, arg),
                    (_, Some(("append", name))) => (BlockMode::Append, name.trim()),
                    (_, Some(("prepend", name))) => (BlockMode::Prepend, name.trim()),
                    _ => (BlockMode::Replace, arg),
                };
                if name.is_empty() {
                    return Err(err(format!("{} requires a name", keyword)));
                }
                let children = self.build(&line.children, file, depth)?;
                nodes.push(Node::Block { name: name.to_string(), mode, children });
                return Ok(());
            }
            _ => {}
        }

        nodes.push(self.build_element(text, line, file, depth)?);
        Ok(())
    }

    fn build_element(&self, text: &str, line: &Line, file: &Path, depth: usize) -> Result<Node, StageError> {
        let (head, rest) = parse_tag(text)
            .map_err(|msg| StageError::new(STAGE, msg).in_file(file).at_line(line.number))?;
        let mut children = Vec::new();

        match rest {
            Rest::None => children.extend(self.build(&line.children, file, depth)?),
            Rest::Text(t) => {
                children.push(Node::Text(t));
                children.extend(self.build(&line.children, file, depth)?);
            }
            Rest::TextBlock => {
                let mut body = Vec::new();
                line.raw_children(&mut body, 0);
                children.push(Node::Text(body.join("\n")));
            }
            // Indented children belong to the innermost expanded tag
            Rest::Expansion(inner) => children.push(self.build_element(&inner, line, file, depth)?),
        }

        Ok(head.into_node(children))
    }
}

/// Replace, append to or prepend to the named block in a layout tree.
fn apply_block(nodes: &mut [Node], block: Node) -> bool {
    let Node::Block { name, mode, children } = &block else {
        return false;
    };
    for node in nodes.iter_mut() {
        match node {
            Node::Block { name: target, children: existing, .. } if target == name => {
                match mode {
                    BlockMode::Replace => *existing = children.clone(),
                    BlockMode::Append => existing.extend(children.iter().cloned()),
                    BlockMode::Prepend => {
                        let mut merged = children.clone();
                        merged.append(existing);
                        *existing = merged;
                    }
                }
                return true;
            }
            Node::Element { children: inner, .. } | Node::Block { children: inner, .. } => {
                if apply_block(inner, block.clone()) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

#[derive(Debug)]
enum Rest {
    None,
    Text(String),
    TextBlock,
    Expansion(String),
}

#[derive(Debug)]
struct TagHead {
    tag: String,
    attrs: Vec<(String, Option<String>)>,
    self_closing: bool,
}

impl TagHead {
    fn into_node(self, children: Vec<Node>) -> Node {
        let void = self.self_closing || VOID_ELEMENTS.contains(&self.tag.as_str());
        Node::Element { tag: self.tag, attrs: self.attrs, children, void }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':'
}

/// Parse `tag#id.class(attrs)` and whatever follows it on the line.
fn parse_tag(text: &str) -> Result<(TagHead, Rest), String> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    let start = i;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-' || chars[i] == '_') {
        i += 1;
    }
    let mut tag: String = chars[start..i].iter().collect();
    if tag.is_empty() {
        if i < chars.len() && (chars[i] == '#' || chars[i] == '.') {
            tag = "div".to_string();
        } else {
            return Err(format!("unexpected '{}'", text));
        }
    }

    let mut id: Option<String> = None;
    let mut classes: Vec<String> = Vec::new();
    let mut attrs: Vec<(String, Option<String>)> = Vec::new();

    loop {
        match chars.get(i) {
            Some('#') | Some('.') if chars.get(i + 1).map(|c| is_name_char(*c)).unwrap_or(false) => {
                let marker = chars[i];
                i += 1;
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if marker == '#' {
                    id = Some(name);
                } else {
                    classes.push(name);
                }
            }
            Some('(') => {
                let close = find_closing_paren(&chars, i)
                    .ok_or_else(|| "unterminated attribute list".to_string())?;
                let inner: String = chars[i + 1..close].iter().collect();
                for (name, value) in parse_attrs(&inner)? {
                    if name == "class" {
                        if let Some(v) = value {
                            classes.push(v);
                        }
                    } else if name == "id" {
                        id = value;
                    } else {
                        attrs.push((name, value));
                    }
                }
                i = close + 1;
            }
            _ => break,
        }
    }

    let mut self_closing = false;
    if chars.get(i) == Some(&'/') {
        self_closing = true;
        i += 1;
    }

    let remainder: String = chars[i..].iter().collect();
    let rest = if remainder.is_empty() {
        Rest::None
    } else if remainder == "." {
        Rest::TextBlock
    } else if let Some(inner) = remainder.strip_prefix(": ") {
        Rest::Expansion(inner.trim().to_string())
    } else if remainder.starts_with('=') || remainder.starts_with("!=") {
        return Err("buffered code is not supported".to_string());
    } else if let Some(t) = remainder.strip_prefix(' ') {
        Rest::Text(t.to_string())
    } else {
        return Err(format!("unexpected '{}' after tag '{}'", remainder, tag));
    };

    let mut all = Vec::new();
    if let Some(id) = id {
        all.push(("id".to_string(), Some(id)));
    }
    if !classes.is_empty() {
        all.push(("class".to_string(), Some(classes.join(" "))));
    }
    all.extend(attrs);

    Ok((TagHead { tag, attrs: all, self_closing }, rest))
}

fn find_closing_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Parse `a="1", b='2' c` into name/value pairs.
fn parse_attrs(inner: &str) -> Result<Vec<(String, Option<String>)>, String> {
    let chars: Vec<char> = inner.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '=' && chars[i] != ',' {
            i += 1;
        }
        let name: String = chars[start..i].iter().collect();
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if chars.get(i) != Some(&'=') {
            out.push((name, None));
            continue;
        }
        i += 1;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let value = match chars.get(i) {
            Some(&q) if q == '"' || q == '\'' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == q)
                    .map(|p| start + p)
                    .ok_or_else(|| format!("unterminated value for attribute '{}'", name))?;
                i = end + 1;
                chars[start..end].iter().collect::<String>()
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && chars[i] != ',' {
                    i += 1;
                }
                chars[start..i].iter().collect::<String>()
            }
        };
        match value.as_str() {
            "true" => out.push((name, None)),
            "false" => {}
            _ => out.push((name, Some(value))),
        }
    }

    Ok(out)
}

fn render(nodes: &[Node], pretty: bool) -> String {
    let mut out = String::new();
    for node in nodes {
        render_node(node, pretty, 0, &mut out);
    }
    if pretty {
        out.trim_start_matches('\n').to_string()
    } else {
        out
    }
}

fn newline(out: &mut String, pretty: bool, depth: usize) {
    if pretty {
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
    }
}

fn is_inline(children: &[Node]) -> bool {
    children.iter().all(|c| matches!(c, Node::Text(t) if !t.contains('\n')))
}

fn render_node(node: &Node, pretty: bool, depth: usize, out: &mut String) {
    match node {
        Node::Doctype(kind) => {
            newline(out, pretty, depth);
            if kind == "html" {
                out.push_str("<!DOCTYPE html>");
            } else {
                out.push_str(&format!("<!DOCTYPE {}>", kind));
            }
        }
        Node::Text(text) => {
            newline(out, pretty, depth);
            out.push_str(text);
        }
        Node::Comment(text) => {
            newline(out, pretty, depth);
            out.push_str(&format!("<!-- {} -->", text));
        }
        Node::Block { children, .. } => {
            for child in children {
                render_node(child, pretty, depth, out);
            }
        }
        Node::Extends(..) => {}
        Node::Element { tag, attrs, children, void } => {
            newline(out, pretty, depth);
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                match value {
                    Some(v) => out.push_str(&format!(" {}=\"{}\"", name, v.replace('"', "&quot;"))),
                    None => out.push_str(&format!(" {}", name)),
                }
            }
            out.push('>');
            if *void && children.is_empty() {
                return;
            }
            if is_inline(children) {
                for child in children {
                    if let Node::Text(t) = child {
                        out.push_str(t);
                    }
                }
            } else {
                for child in children {
                    render_node(child, pretty, depth + 1, out);
                }
                newline(out, pretty, depth);
            }
            out.push_str(&format!("</{}>", tag));
        }
    }
}
