use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::{
    manifest,
    proxy::{allowlisted, relay_headers, ForwardSpec, MANIFEST_REQUEST_ALLOWLIST},
    server::{params::SegmentParams, AppState},
    token::MediaType,
    Error, Result,
};

/// Handle GET /stream/{stream}/index.m3u8 requests.
///
/// The top-level manifest endpoint is unauthenticated; every reference
/// inside the served playlist carries its own signed token.
pub async fn handle_manifest(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    tracing::info!(stream, "manifest request");

    let lease = state.leases.get(&stream).await?;
    let upstream = match lease.proxy.as_deref() {
        Some(proxy) if lease.is_hls() => Url::parse(proxy)?,
        _ => state
            .config
            .media_hls_url
            .join(&format!("{}/index.m3u8", stream))?,
    };

    let fetch_headers = allowlisted(&headers, &MANIFEST_REQUEST_ALLOWLIST);
    let content = state
        .client
        .fetch_text(upstream.as_str(), Some(&fetch_headers))
        .await?;

    let rewritten = manifest::rewrite(&content, &upstream, &stream, &state.signer, &state.cache)?;

    Ok((
        [(header::CONTENT_TYPE, MediaType::M3u8.content_type())],
        rewritten,
    )
        .into_response())
}

/// Handle GET /stream/{stream}/segment.{format} requests.
///
/// The token binds the grant to a single stream, resource hash and media
/// type; a verified grant whose cache entry has lapsed is a 404, not a 401,
/// so players can distinguish expiry from a bad link.
pub async fn handle_segment(
    State(state): State<AppState>,
    Path((stream, format)): Path<(String, String)>,
    Query(params): Query<SegmentParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let token = params.token.as_deref().ok_or(Error::InvalidSignedUrl)?;
    let grant = state
        .signer
        .verify(&stream, token)
        .ok_or(Error::InvalidSignedUrl)?;

    // The path extension is cosmetic for players, but it must agree with
    // what the token was issued for.
    match MediaType::from_extension(&format) {
        Some(requested) if requested == grant.media_type => {}
        _ => return Err(Error::InvalidSignedUrl),
    }

    let url = state
        .cache
        .get(&stream, &grant.hash)
        .ok_or(Error::ResourceExpired)?;

    tracing::debug!(stream, media_type = grant.media_type.as_str(), "segment request");

    // A nested playlist re-enters the rewriter with the cached URL as the
    // new base so its own references get signed in turn.
    if grant.media_type == MediaType::M3u8 {
        let base = Url::parse(&url)?;
        let fetch_headers = allowlisted(&headers, &MANIFEST_REQUEST_ALLOWLIST);
        let content = state.client.fetch_text(&url, Some(&fetch_headers)).await?;
        let rewritten = manifest::rewrite(&content, &base, &stream, &state.signer, &state.cache)?;

        return Ok((
            [(header::CONTENT_TYPE, MediaType::M3u8.content_type())],
            rewritten,
        )
            .into_response());
    }

    let mut spec = ForwardSpec::get(url);
    spec.headers = relay_headers(&headers);
    state.client.forward(spec).await
}
