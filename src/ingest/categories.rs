// src/ingest/categories.rs
//! Board slugs published by the feed, with their display names.

pub const CATEGORIES: &[(&str, &str)] = &[
    ("daily", "日常"),
    ("tech", "技术"),
    ("info", "情报"),
    ("review", "测评"),
    ("trade", "交易"),
    ("carpool", "拼车"),
    ("dev", "Dev"),
    ("photo-share", "贴图"),
    ("expose", "曝光"),
    ("sandbox", "沙盒"),
];

pub fn is_known(slug: &str) -> bool {
    CATEGORIES.iter().any(|(s, _)| *s == slug)
}

/// Display name for a slug; unknown slugs are shown as-is.
pub fn display_name(slug: &str) -> &str {
    CATEGORIES
        .iter()
        .find(|(s, _)| *s == slug)
        .map(|(_, name)| *name)
        .unwrap_or(slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown() {
        assert!(is_known("photo-share"));
        assert!(!is_known("Trade"));
        assert_eq!(display_name("trade"), "交易");
        assert_eq!(display_name("lounge"), "lounge");
    }
}
