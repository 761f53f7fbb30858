//! Outbound HTTP plumbing: header filtering, bounded retries and a
//! streaming forwarder used by the segment proxy and the management
//! passthrough endpoints.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, Method},
    response::Response,
};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::Client;

use crate::{Error, Result};

/// Response headers relayed back to the original caller. Everything else is
/// dropped.
pub const RESPONSE_ALLOWLIST: [&str; 5] = [
    "content-type",
    "content-length",
    "cache-control",
    "content-encoding",
    "last-modified",
];

/// Inbound headers forwarded upstream on manifest fetches.
/// `accept-encoding` is omitted so the rewriter always sees plain text.
pub const MANIFEST_REQUEST_ALLOWLIST: [&str; 4] =
    ["authorization", "user-agent", "accept", "accept-language"];

/// Connection-management headers never forwarded in either direction.
/// `authorization` is included because the forwarder always replaces it.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "host",
    "content-length",
    "accept-encoding",
    "authorization",
];

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// An outbound call the forwarder should perform on a caller's behalf.
#[derive(Debug)]
pub struct ForwardSpec {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ForwardSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// HTTP client for upstream calls.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
}

impl ProxyClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Fetch a text resource (a manifest), retrying transient failures with
    /// exponential backoff. Non-2xx responses are upstream errors.
    pub async fn fetch_text(&self, url: &str, headers: Option<&HeaderMap>) -> Result<String> {
        let response = self.get_with_retry(url, headers).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        response.text().await.map_err(Error::from)
    }

    /// Fetch and decode a JSON resource, with the same retry policy as
    /// [`fetch_text`](Self::fetch_text).
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        headers: Option<&HeaderMap>,
    ) -> Result<T> {
        let response = self.get_with_retry(url, headers).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        response.json().await.map_err(Error::from)
    }

    /// Issue a JSON mutation and check for success, without retry; a failed
    /// write is surfaced to the caller and reattempted on its next cycle.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut request = self.client.request(method, url).headers(headers.clone());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        Ok(())
    }

    /// Perform the outbound call and stream the response straight through,
    /// relaying only allow-listed headers. The upstream status code is
    /// passed through untouched; transport failures become normalized
    /// 502/504 responses at the boundary.
    pub async fn forward(&self, spec: ForwardSpec) -> Result<Response> {
        let mut request = self
            .client
            .request(spec.method, &spec.url)
            .headers(spec.headers);

        if let Some(body) = spec.body {
            request = request.body(body);
        }

        let upstream = request.send().await?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            for name in RESPONSE_ALLOWLIST {
                if let Some(value) = upstream.headers().get(name) {
                    if let Ok(name) = HeaderName::try_from(name) {
                        headers.insert(name, value.clone());
                    }
                }
            }
        }

        let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));

        response
            .body(body)
            .map_err(|e| Error::Internal(e.to_string()))
    }

    async fn get_with_retry(
        &self,
        url: &str,
        headers: Option<&HeaderMap>,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.get(url);
            if let Some(headers) = headers {
                request = request.headers(headers.clone());
            }

            match request.send().await {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Ok(response) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Ok(response);
                    }
                    tracing::warn!(url, status = %response.status(), attempt, "upstream error, retrying");
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(err.into());
                    }
                    tracing::warn!(url, error = %err, attempt, "upstream request failed, retrying");
                }
            }

            tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
        }
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Copy only allow-listed headers from an inbound request.
pub fn allowlisted(headers: &HeaderMap, allow: &[&str]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in allow {
        if let Some(value) = headers.get(*name) {
            if let Ok(name) = HeaderName::try_from(*name) {
                out.insert(name, value.clone());
            }
        }
    }
    out
}

/// Copy inbound request headers for a passthrough call, stripping the
/// hop-by-hop set.
pub fn relay_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("authorization", "Bearer secret"),
            ("user-agent", "hls-player/1.0"),
            ("accept", "*/*"),
            ("accept-encoding", "gzip"),
            ("connection", "keep-alive"),
            ("host", "proxy.example.com"),
            ("x-custom", "1"),
        ] {
            headers.insert(
                HeaderName::try_from(name).unwrap(),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    #[test]
    fn test_allowlisted_keeps_only_named_headers() {
        let out = allowlisted(&inbound(), &MANIFEST_REQUEST_ALLOWLIST);

        assert_eq!(out.len(), 3);
        assert!(out.contains_key("authorization"));
        assert!(out.contains_key("user-agent"));
        assert!(out.contains_key("accept"));
        assert!(!out.contains_key("accept-encoding"));
        assert!(!out.contains_key("x-custom"));
    }

    #[test]
    fn test_relay_headers_strips_hop_by_hop() {
        let out = relay_headers(&inbound());

        assert!(!out.contains_key("connection"));
        assert!(!out.contains_key("host"));
        assert!(!out.contains_key("accept-encoding"));
        assert!(!out.contains_key("authorization"));
        assert!(out.contains_key("x-custom"));
        assert!(out.contains_key("user-agent"));
    }
}
