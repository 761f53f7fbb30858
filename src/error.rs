use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Authentication Required")]
    AuthenticationRequired,

    #[error("Invalid Token")]
    InvalidToken,

    #[error("{0}")]
    Forbidden(String),

    #[error("Invalid or expired signed URL")]
    InvalidSignedUrl,

    #[error("Resource not found or expired")]
    ResourceExpired,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid M3U8 Manifest")]
    InvalidManifest,

    #[error("Unsupported media segment type: {0}")]
    UnsupportedSegment(String),

    #[error("Failed to fetch URL: {url} - {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Fetch timeout for URL: {0}")]
    FetchTimeout(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Config file error: {0}")]
    ConfigFile(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error body surfaced to clients. Never carries transport detail
/// beyond the normalized message.
#[derive(Serialize)]
struct StandardResponse {
    status: u16,
    message: String,
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired | Self::InvalidToken | Self::InvalidSignedUrl => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ResourceExpired | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidManifest | Self::UnsupportedSegment(_) | Self::InvalidUrl(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::FetchFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ConfigFile(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = StandardResponse {
            status: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::FetchTimeout(e.url().map(|u| u.to_string()).unwrap_or_default())
        } else {
            Self::FetchFailed {
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: e.to_string(),
            }
        }
    }
}
