pub mod handlers;
pub mod params;

use std::sync::Arc;

use axum::{
    http::Method,
    routing::get,
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    cache::ResourceCache,
    config::Config,
    lease::LeaseClient,
    media::MediaClient,
    proxy::ProxyClient,
    token::TokenSigner,
};

use handlers::{path, stream};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: ProxyClient,
    pub signer: TokenSigner,
    pub cache: Arc<ResourceCache>,
    pub leases: Arc<LeaseClient>,
    pub media: Arc<MediaClient>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let leases = LeaseClient::new(
            config.api_url.clone(),
            config.lease_endpoint.clone(),
            config.signing_secret.clone(),
        );
        let media = MediaClient::new(config.media_api_url.clone(), config.media_secret.clone());

        Self {
            client: ProxyClient::default(),
            signer: TokenSigner::new(config.signing_secret.as_bytes()),
            cache: Arc::new(ResourceCache::default()),
            leases: Arc::new(leases),
            media: Arc::new(media),
            config,
        }
    }
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/stream/{stream}/index.m3u8", get(stream::handle_manifest))
        .route(
            "/stream/{stream}/segment.{format}",
            get(stream::handle_segment),
        )
        .route("/path", get(path::list_paths).post(path::create_path))
        .route(
            "/path/{path}",
            get(path::get_path)
                .patch(path::update_path)
                .delete(path::delete_path),
        )
        .route("/v3/config/global/get", get(path::global_config))
        .route("/v3/recordings/get/{path}", get(path::recordings))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
