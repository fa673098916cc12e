//! Sitemap generation.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::pipeline::{Asset, Stage, StageContext};
use crate::task::StageError;

/// Collapse every incoming page into a single `sitemap.xml`.
///
/// Pages are located by their path relative to the glob base; their
/// contents are not needed. `index.html` maps to its directory URL.
#[derive(Debug, Clone)]
pub struct Sitemap {
    site_url: String,
}

impl Sitemap {
    /// Create a sitemap stage for a site root URL.
    pub fn new(site_url: impl Into<String>) -> Self {
        Self { site_url: site_url.into().trim_end_matches('/').to_string() }
    }

    fn location(&self, page: &Path) -> String {
        let mut parts: Vec<String> =
            page.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
        if parts.last().map(|p| p == "index.html").unwrap_or(false) {
            parts.pop();
            parts.push(String::new());
        }
        format!("{}/{}", self.site_url, parts.join("/"))
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn last_modified(asset: &Asset) -> Option<String> {
    let modified = fs::metadata(asset.source.as_ref()?).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl Stage for Sitemap {
    fn name(&self) -> &str {
        "sitemap"
    }

    fn apply(&self, assets: Vec<Asset>, _ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        let mut entries: Vec<(String, Option<String>)> =
            assets.iter().map(|a| (self.location(&a.path), last_modified(a))).collect();
        entries.sort();

        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
        );
        for (loc, lastmod) in entries {
            xml.push_str("  <url>\n");
            let _ = writeln!(xml, "    <loc>{}</loc>", escape_xml(&loc));
            if let Some(lastmod) = lastmod {
                let _ = writeln!(xml, "    <lastmod>{}</lastmod>", lastmod);
            }
            xml.push_str("  </url>\n");
        }
        xml.push_str("</urlset>\n");

        Ok(vec![Asset::new("sitemap.xml", xml)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_locations() {
        let sitemap = Sitemap::new("https://example.com/");
        assert_eq!(sitemap.location(Path::new("index.html")), "https://example.com/");
        assert_eq!(sitemap.location(Path::new("about.html")), "https://example.com/about.html");
        assert_eq!(sitemap.location(Path::new("blog/index.html")), "https://example.com/blog/");
    }

    #[test]
    fn test_sitemap_lists_pages_sorted_with_lastmod() {
        let temp = TempDir::new().unwrap();
        let page = temp.path().join("about.html");
        fs::write(&page, "<html></html>").unwrap();

        let assets = vec![
            Asset::new("about.html", vec![]).with_source(&page),
            Asset::new("index.html", vec![]),
            Asset::new("a&b.html", vec![]),
        ];
        let mut ctx = StageContext::new(temp.path());
        let out = Sitemap::new("https://example.com").apply(assets, &mut ctx).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, PathBuf::from("sitemap.xml"));
        let xml = String::from_utf8(out[0].contents.clone()).unwrap();
        let root = xml.find("<loc>https://example.com/</loc>").unwrap();
        let amp = xml.find("<loc>https://example.com/a&amp;b.html</loc>").unwrap();
        let about = xml.find("<loc>https://example.com/about.html</loc>").unwrap();
        assert!(root < amp && amp < about);
        assert_eq!(xml.matches("<lastmod>").count(), 1);
    }

    #[test]
    fn test_empty_site() {
        let mut ctx = StageContext::new("/nonexistent");
        let out = Sitemap::new("https://example.com").apply(vec![], &mut ctx).unwrap();
        let xml = String::from_utf8(out[0].contents.clone()).unwrap();
        assert!(xml.contains("<urlset"));
        assert!(!xml.contains("<url>"));
    }
}
