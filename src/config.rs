use std::{env, path::PathBuf, time::Duration};

use anyhow::Context;
use url::Url;

/// Runtime configuration, resolved from the environment once at startup.
///
/// The three secrets/URLs without defaults are required: the process must
/// not serve traffic without them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote lease API base URL.
    pub api_url: Url,
    /// Shared secret for segment tokens and bearer capability tokens.
    pub signing_secret: String,
    /// Management credential for the media server (Basic password for
    /// the `management` user).
    pub media_secret: String,

    /// Local HTTP listen address.
    pub listen: String,
    /// Media server management API base URL.
    pub media_api_url: Url,
    /// Media server HLS output base URL, used for leases without a proxy source.
    pub media_hls_url: Url,
    /// Collection path of the lease API (historically `/api/video/lease`
    /// or `/video/lease`; kept configurable).
    pub lease_endpoint: String,

    /// Reconciliation tick interval.
    pub sync_interval: Duration,
    /// How long a path must stay unleased before it is removed.
    pub cleanup_grace: Duration,
    /// When set, the media server is managed through this static config
    /// file instead of its live API.
    pub media_config_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = required("API_URL")?;
        let signing_secret = required("SIGNING_SECRET")?;
        let media_secret = required("MEDIA_SECRET")?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "8080".to_string());

        Ok(Self {
            api_url: Url::parse(&api_url).context("API_URL is not a valid URL")?,
            signing_secret,
            media_secret,
            listen: format!("{}:{}", host, port),
            media_api_url: parse_url_var("MEDIA_API_URL", "http://localhost:4000")?,
            media_hls_url: parse_url_var("MEDIA_HLS_URL", "http://localhost:8888")?,
            lease_endpoint: env::var("LEASE_ENDPOINT")
                .unwrap_or_else(|_| "/api/video/lease".to_string()),
            sync_interval: Duration::from_secs(parse_var("SYNC_INTERVAL", 10)?),
            cleanup_grace: Duration::from_secs(parse_var("CLEANUP_GRACE", 300)?),
            media_config_path: env::var("MEDIA_CONFIG_PATH").ok().map(PathBuf::from),
        })
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{} Env Var not set", name))
}

fn parse_url_var(name: &str, default: &str) -> anyhow::Result<Url> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    Url::parse(&value).with_context(|| format!("{} is not a valid URL", name))
}

fn parse_var(name: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{} is not a valid integer", name)),
        Err(_) => Ok(default),
    }
}
