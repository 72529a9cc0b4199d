// src/ingest/providers/rss.rs
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::{RelayError, Result};
use crate::ingest::normalize_text;
use crate::ingest::types::{FeedQuery, FeedSource};
use crate::model::{FeedItem, ItemId};

pub const DEFAULT_FEED_URL: &str = "https://rss.nodeseek.com/";

// The feed sits behind Cloudflare, which rejects non-browser clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REFERER: &str = "https://www.nodeseek.com/";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(default)]
    category: Vec<Text>,
    author: Option<String>,
    #[serde(rename = "dc:creator", alias = "creator")]
    creator: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// Element text, ignoring attributes such as `isPermaLink` or `domain`.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_rfc2822_to_unix(ts: &str) -> u64 {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .unwrap_or(0)
}

fn item_id(guid: Option<&str>, link: Option<&str>) -> Option<ItemId> {
    static RE_POST: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"post-(\d+)").expect("post id regex"));

    let from_guid = guid.and_then(|g| g.trim().parse::<u64>().ok());
    let id = from_guid.or_else(|| {
        link.and_then(|l| RE_POST.captures(l))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
    })?;
    (id != 0).then_some(ItemId(id))
}

/// Parse one feed document. Items without a usable id are skipped.
pub fn parse_feed(xml: &str) -> anyhow::Result<Vec<FeedItem>> {
    let t0 = std::time::Instant::now();
    let rss: Rss = from_str(xml).context("parsing rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let Some(id) = item_id(
            it.guid.as_ref().map(|g| g.value.as_str()),
            it.link.as_deref(),
        ) else {
            tracing::debug!(target: "ingest", title = ?it.title, "skipping item without id");
            continue;
        };

        let category = it
            .category
            .first()
            .map(|c| c.value.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let author = it.author.or(it.creator).unwrap_or_default();
        let body = it
            .description
            .as_deref()
            .map(normalize_text)
            .filter(|b| !b.is_empty());

        out.push(FeedItem {
            id,
            title: normalize_text(it.title.as_deref().unwrap_or_default()),
            author: author.trim().to_string(),
            category,
            link: it.link.unwrap_or_default().trim().to_string(),
            published_at: it.pub_date.as_deref().map(parse_rfc2822_to_unix).unwrap_or(0),
            body,
        });
    }

    histogram!("relay_feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("relay_feed_items_total").increment(out.len() as u64);
    Ok(out)
}

pub struct RssFeedSource {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { base_url: String, client: reqwest::Client },
}

impl RssFeedSource {
    /// Serves a fixed document; category queries filter its items by slug.
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn http(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        headers.insert(header::REFERER, HeaderValue::from_static(REFERER));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.to_string(),
                client,
            },
        })
    }

    async fn get(client: &reqwest::Client, url: &str) -> Result<Vec<FeedItem>> {
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::FetchFailure(format!("{url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::FetchFailure(format!("{url}: HTTP {status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| RelayError::FetchFailure(format!("{url}: reading body: {e}")))?;
        parse_feed(&body).map_err(|e| RelayError::FetchFailure(format!("{url}: {e:#}")))
    }
}

fn category_url(base: &str, slug: &str) -> String {
    format!("{base}?category={slug}")
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch_items(&self, query: &FeedQuery) -> Result<Vec<FeedItem>> {
        let mut merged: BTreeMap<ItemId, FeedItem> = BTreeMap::new();
        match (&self.mode, query) {
            (Mode::Fixture(xml), _) => {
                let items =
                    parse_feed(xml).map_err(|e| RelayError::FetchFailure(format!("{e:#}")))?;
                for it in items {
                    let keep = match query {
                        FeedQuery::Global => true,
                        FeedQuery::Categories(slugs) => slugs.contains(&it.category),
                    };
                    if keep {
                        merged.insert(it.id, it);
                    }
                }
            }
            (Mode::Http { base_url, client }, FeedQuery::Global) => {
                for it in Self::get(client, base_url).await? {
                    merged.insert(it.id, it);
                }
            }
            (Mode::Http { base_url, client }, FeedQuery::Categories(slugs)) => {
                for slug in slugs {
                    for it in Self::get(client, &category_url(base_url, slug)).await? {
                        merged.insert(it.id, it);
                    }
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_from_guid_then_link() {
        assert_eq!(item_id(Some(" 4021 "), None), Some(ItemId(4021)));
        assert_eq!(
            item_id(Some("not-a-number"), Some("https://www.nodeseek.com/post-77-1")),
            Some(ItemId(77))
        );
        assert_eq!(item_id(Some("0"), None), None);
        assert_eq!(item_id(None, Some("https://example.com/")), None);
    }

    #[test]
    fn rfc2822_dates_parse_and_garbage_is_zero() {
        assert_eq!(
            parse_rfc2822_to_unix("Thu, 01 Jan 1970 00:01:40 +0000"),
            100
        );
        assert_eq!(parse_rfc2822_to_unix("yesterday"), 0);
    }

    #[test]
    fn category_url_appends_query() {
        assert_eq!(
            category_url(DEFAULT_FEED_URL, "trade"),
            "https://rss.nodeseek.com/?category=trade"
        );
    }
}
