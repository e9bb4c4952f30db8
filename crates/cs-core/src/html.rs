//! Conversion of anchor markup in calendar descriptions to plain text.

use std::sync::LazyLock;

use regex::Regex;

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<a\s+href="([^"]+)"[^>]*>([^<]+)</a>"#).unwrap());

/// Rewrites `<a href="URL">TEXT</a>` as `URL (TEXT)`.
///
/// Anything that is not a well-formed anchor is left untouched.
pub fn links_to_text(text: &str) -> String {
    ANCHOR_RE.replace_all(text, "$1 ($2)").into_owned()
}
