//! Client for the media server's management API and the path definitions
//! it manages.

use std::{collections::HashMap, time::Duration};

use axum::http::{header, HeaderMap, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{auth, lease::Lease, proxy::ProxyClient, Error, Result};

const PAGE_LIMIT: u64 = 100;

/// A media-server path definition, derived deterministically from a lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathConfig {
    pub name: String,
    #[serde(default)]
    pub record: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_on_demand: Option<bool>,
}

impl PathConfig {
    /// Proxied leases become on-demand pull sources; direct-publish leases
    /// carry no source fields at all.
    pub fn from_lease(lease: &Lease) -> Self {
        match &lease.proxy {
            Some(proxy) => Self {
                name: lease.path.clone(),
                record: lease.recording,
                source: Some(proxy.clone()),
                source_on_demand: Some(true),
            },
            None => Self {
                name: lease.path.clone(),
                record: lease.recording,
                source: None,
                source_on_demand: None,
            },
        }
    }

    /// Whether the live path differs from this derived definition in any
    /// field the reconciler owns.
    pub fn differs_from(&self, live: &Self) -> bool {
        self.record != live.record
            || self.source != live.source
            || self.source_on_demand != live.source_on_demand
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathPage {
    item_count: u64,
    items: Vec<PathConfig>,
}

pub struct MediaClient {
    client: ProxyClient,
    base: Url,
    media_secret: String,
}

impl MediaClient {
    pub fn new(base: Url, media_secret: String) -> Self {
        Self {
            client: ProxyClient::new(Duration::from_secs(5)),
            base,
            media_secret,
        }
    }

    /// Fetch the complete current path set, keyed by name.
    pub async fn list_paths(&self) -> Result<HashMap<String, PathConfig>> {
        let mut paths = HashMap::new();
        let mut page: u64 = 0;

        loop {
            let mut url = self.endpoint("/v3/config/paths/list")?;
            url.query_pairs_mut()
                .append_pair("itemsPerPage", &PAGE_LIMIT.to_string())
                .append_pair("page", &page.to_string());

            let body: PathPage = self
                .client
                .fetch_json(url.as_str(), Some(&self.headers()?))
                .await?;

            let total = body.item_count;
            for path in body.items {
                paths.insert(path.name.clone(), path);
            }

            page += 1;
            if total <= page * PAGE_LIMIT {
                break;
            }
        }

        Ok(paths)
    }

    pub async fn create_path(&self, path: &PathConfig) -> Result<()> {
        let url = self.endpoint(&format!("/v3/config/paths/add/{}", path.name))?;
        self.send_json(Method::POST, &url, path).await
    }

    pub async fn replace_path(&self, path: &PathConfig) -> Result<()> {
        let url = self.endpoint(&format!("/v3/config/paths/replace/{}", path.name))?;
        self.send_json(Method::POST, &url, path).await
    }

    pub async fn delete_path(&self, name: &str) -> Result<()> {
        let url = self.endpoint(&format!("/v3/config/paths/delete/{}", name))?;
        self.client
            .send(Method::DELETE, url.as_str(), &self.headers()?, None)
            .await
    }

    /// Absolute management URL for a relative endpoint path; also used by
    /// the passthrough request handlers.
    pub fn endpoint(&self, suffix: &str) -> Result<Url> {
        self.base.join(suffix).map_err(Error::from)
    }

    /// Management credential headers, shared with the passthrough handlers.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = auth::management_header(&self.media_secret);
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| Error::Internal(e.to_string()))?,
        );
        Ok(headers)
    }

    async fn send_json(&self, method: Method, url: &Url, path: &PathConfig) -> Result<()> {
        let body = serde_json::to_value(path).map_err(|e| Error::Internal(e.to_string()))?;
        self.client
            .send(method, url.as_str(), &self.headers()?, Some(body))
            .await
    }
}
