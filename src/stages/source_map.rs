//! Source map files written next to compiled assets.

use parcel_sourcemap::SourceMap;
use std::path::{Path, PathBuf};

use crate::pipeline::Asset;
use crate::task::StageError;

/// Comment syntax of the `sourceMappingURL` link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSyntax {
    /// `/*# sourceMappingURL=... */`
    Css,
    /// `//# sourceMappingURL=...`
    Js,
}

/// Path of the map for `path` (`style.css` → `style.css.map`).
pub fn map_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".map");
    PathBuf::from(p)
}

/// True for `.map` files.
pub fn is_map(path: &Path) -> bool {
    path.extension().map(|e| e == "map").unwrap_or(false)
}

/// Serialize `map` as the asset that sits next to `asset`.
pub fn map_asset(asset: &Asset, map: &mut SourceMap, stage: &str) -> Result<Asset, StageError> {
    let json = map.to_json(None).map_err(|e| {
        StageError::new(stage, format!("Failed to write source map: {}", e)).in_file(asset.origin())
    })?;
    Ok(Asset { path: map_path(&asset.path), source: asset.source.clone(), contents: json.into_bytes() })
}

/// Point `code` at `map_file`, replacing a trailing link if there is one.
pub fn link(code: &str, map_file: &str, syntax: LinkSyntax) -> String {
    let comment = match syntax {
        LinkSyntax::Css => format!("/*# sourceMappingURL={} */", map_file),
        LinkSyntax::Js => format!("//# sourceMappingURL={}", map_file),
    };
    format!("{}\n{}\n", unlink(code).trim_end(), comment)
}

fn unlink(code: &str) -> &str {
    let trimmed = code.trim_end();
    let start = trimmed.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let last = &trimmed[start..];
    if last.starts_with("//# sourceMappingURL=") || last.starts_with("/*# sourceMappingURL=") {
        &trimmed[..start]
    } else {
        code
    }
}
