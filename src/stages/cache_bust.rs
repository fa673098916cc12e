//! Cache busting of local script and stylesheet references.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::pipeline::{Asset, Stage, StageContext};
use crate::task::StageError;

/// Append `?t=<token>` to local `.js`/`.css` `src`/`href` attributes.
///
/// An existing query string is replaced, so re-running never stacks tokens.
#[derive(Debug, Clone)]
pub struct CacheBust;

impl CacheBust {
    /// Bust with the current time in milliseconds since the epoch.
    pub fn timestamp() -> Self {
        Self
    }

    fn token(&self) -> String {
        chrono::Utc::now().timestamp_millis().to_string()
    }
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b((?:src|href)\s*=\s*)(["'])([^"'?#]+\.(?:js|css))(?:\?[^"'#]*)?(["'#])"#)
            .expect("reference pattern is valid")
    })
}

fn is_local(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    !(lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("//")
        || lower.starts_with("data:"))
}

/// Rewrite references in one HTML document.
pub fn bust_references(html: &str, token: &str) -> String {
    reference_regex()
        .replace_all(html, |caps: &Captures| {
            if is_local(&caps[3]) {
                format!("{}{}{}?t={}{}", &caps[1], &caps[2], &caps[3], token, &caps[4])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

impl Stage for CacheBust {
    fn name(&self) -> &str {
        "cache"
    }

    fn apply(&self, assets: Vec<Asset>, _ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        let token = self.token();
        assets
            .into_iter()
            .map(|asset| {
                let html = bust_references(asset.text("cache")?, &token);
                Ok(Asset { contents: html.into_bytes(), ..asset })
            })
            .collect()
    }
}
