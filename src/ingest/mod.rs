// src/ingest/mod.rs
pub mod categories;
pub mod providers;
pub mod types;

pub use types::{FeedQuery, FeedSource, StaticFeed};

use once_cell::sync::OnceCell;
use regex::Regex;

/// Normalize feed text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 4) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  出&nbsp;&nbsp; <b>DMIT</b>\n CN2 GIA!  ";
        assert_eq!(normalize_text(s), "出 DMIT CN2 GIA!");
    }

    #[test]
    fn normalize_text_caps_length() {
        let long = "字".repeat(2000);
        assert_eq!(normalize_text(&long).chars().count(), 1500);
    }
}
