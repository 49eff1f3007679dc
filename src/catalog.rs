use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{debug, trace};

use crate::version::{sort_newest_first, VersionInfo};

/// Tag listing of the Go repository; release tags are `go1.x[.y]`.
pub const DEFAULT_CATALOG_URL: &str = "https://go.googlesource.com/go/+refs";

/// Prefix every release tag carries.
pub const PRODUCT_TAG: &str = "go";

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<li\b[^>]*\bclass\s*=\s*"[^"]*\bRefList-item\b[^"]*"[^>]*>(.*?)</li>"#)
        .expect("list item regex is valid")
});

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").expect("anchor regex is valid")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex is valid"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog request returned status {0}")]
    Status(u16),
}

/// Fetch the tag listing and return every parseable Go version, newest first.
pub fn fetch_catalog(client: &Client, url: &str) -> Result<Vec<VersionInfo>, FetchError> {
    debug!("GET {url}");
    let response = client.get(url).send()?;
    let status = response.status();
    if status.as_u16() != 200 {
        return Err(FetchError::Status(status.as_u16()));
    }
    let body = response.text()?;
    let catalog = parse_catalog(&body);
    debug!(versions = catalog.len(), "catalog parsed");
    Ok(catalog)
}

/// Extract versions from the listing page. Entries that are not Go release
/// tags, or that fail to parse, are skipped.
pub fn parse_catalog(html: &str) -> Vec<VersionInfo> {
    let mut seen = HashSet::new();
    let mut versions = Vec::new();

    for item in ITEM_RE.captures_iter(html) {
        let text: String = ANCHOR_RE
            .captures_iter(&item[1])
            .map(|anchor| TAG_RE.replace_all(&anchor[1], "").into_owned())
            .collect();
        let text = text.trim();

        let Some(tag) = text.strip_prefix(PRODUCT_TAG) else {
            continue;
        };
        match VersionInfo::parse(tag) {
            Ok(version) => {
                if seen.insert(version) {
                    versions.push(version);
                }
            }
            Err(e) => trace!("skipping {text}: {e}"),
        }
    }

    sort_newest_first(&mut versions);
    versions
}
