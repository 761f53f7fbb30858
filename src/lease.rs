//! Client for the remote lease API, the source of truth for which stream
//! paths should exist.

use std::{collections::HashMap, time::Duration};

use axum::http::{header, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::{auth, proxy::ProxyClient, Error, Result};

const PAGE_LIMIT: u64 = 100;

/// A remote video lease. Owned and mutated exclusively by the remote
/// system; this service only reads them.
#[derive(Debug, Clone, Deserialize)]
pub struct Lease {
    pub id: i64,
    pub path: String,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Lease {
    /// Leases backed by an HLS playlist are served by this sidecar's own
    /// proxy instead of being handed to the media server.
    pub fn is_hls(&self) -> bool {
        self.proxy.as_deref().is_some_and(is_hls_path)
    }
}

/// Whether a source address points at an HLS playlist. The query string is
/// ignored.
pub fn is_hls_path(source: &str) -> bool {
    let path = source.split('?').next().unwrap_or(source);
    path.ends_with(".m3u8")
}

#[derive(Debug, Deserialize)]
struct LeasePage {
    total: u64,
    items: Vec<Lease>,
}

/// Whether another page must be fetched after `page` pages of size `limit`.
pub(crate) fn has_more(total: u64, page: u64, limit: u64) -> bool {
    total > page * limit
}

pub struct LeaseClient {
    client: ProxyClient,
    api_url: Url,
    endpoint: String,
    signing_secret: String,
}

impl LeaseClient {
    pub fn new(api_url: Url, endpoint: String, signing_secret: String) -> Self {
        Self {
            client: ProxyClient::new(Duration::from_secs(10)),
            api_url,
            endpoint,
            signing_secret,
        }
    }

    /// Fetch the complete lease set, keyed by path name.
    pub async fn list(&self) -> Result<HashMap<String, Lease>> {
        let mut leases = HashMap::new();
        let mut page: u64 = 0;

        loop {
            let mut url = self.collection_url()?;
            url.query_pairs_mut()
                .append_pair("limit", &PAGE_LIMIT.to_string())
                .append_pair("expired", "false")
                .append_pair("ephemeral", "all")
                .append_pair("impersonate", "true")
                .append_pair("page", &page.to_string());

            let body: LeasePage = self
                .client
                .fetch_json(url.as_str(), Some(&self.headers()?))
                .await?;

            let total = body.total;
            for lease in body.items {
                leases.insert(lease.path.clone(), lease);
            }

            page += 1;
            if !has_more(total, page, PAGE_LIMIT) {
                break;
            }
        }

        Ok(leases)
    }

    /// Fetch a single lease by path name.
    pub async fn get(&self, path: &str) -> Result<Lease> {
        let url = self
            .api_url
            .join(&format!("{}/{}", self.endpoint.trim_end_matches('/'), path))?;

        self.client
            .fetch_json(url.as_str(), Some(&self.headers()?))
            .await
    }

    fn collection_url(&self) -> Result<Url> {
        self.api_url.join(&self.endpoint).map_err(Error::from)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", auth::lease_token(&self.signing_secret));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| Error::Internal(e.to_string()))?,
        );
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_fetch_count() {
        // ceil(total / limit) fetches for any total > 0; one probe fetch
        // when the collection is empty.
        for (total, expected) in [(0u64, 1u64), (1, 1), (99, 1), (100, 1), (101, 2), (250, 3)] {
            let mut fetches = 0;
            let mut page = 0;
            loop {
                fetches += 1;
                page += 1;
                if !has_more(total, page, PAGE_LIMIT) {
                    break;
                }
            }
            assert_eq!(fetches, expected, "total={}", total);
        }
    }

    #[test]
    fn test_hls_detection() {
        let lease = |proxy: Option<&str>| Lease {
            id: 1,
            path: "p1".to_string(),
            recording: false,
            proxy: proxy.map(String::from),
        };

        assert!(lease(Some("https://cdn.example.com/live/index.m3u8")).is_hls());
        assert!(lease(Some("https://cdn.example.com/live/index.m3u8?auth=1")).is_hls());
        assert!(!lease(Some("rtmp://cdn.example.com/live/stream")).is_hls());
        assert!(!lease(None).is_hls());
    }
}
