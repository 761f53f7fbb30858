use serde::Deserialize;

/// Query parameters for signed segment requests.
#[derive(Debug, Deserialize)]
pub struct SegmentParams {
    /// Opaque access token issued during manifest rewriting.
    #[serde(default)]
    pub token: Option<String>,
}

/// Bearer token fallback for management endpoints, for clients that cannot
/// set an `Authorization` header.
#[derive(Debug, Deserialize)]
pub struct AuthParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Body for path creation.
#[derive(Debug, Deserialize)]
pub struct CreatePathBody {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub record: bool,
}

/// Body for path patches. Everything is optional; omitted fields are left
/// untouched by the media server.
#[derive(Debug, Deserialize)]
pub struct PatchPathBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub record: Option<bool>,
}
