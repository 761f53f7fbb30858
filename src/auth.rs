//! Bearer-token capability checks for the management surface.
//!
//! Inbound tokens are JWTs signed with the shared secret, carrying a scoped
//! capability `{ access, id?, internal }`. A handler declares either an
//! explicit list of acceptable resources or a blanket any-resource scope;
//! the [`Scope`] enum makes declaring both (or neither) unrepresentable.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Legacy prefix carried by remotely minted tokens.
const TOKEN_PREFIX: &str = "etl.";

/// Lifetime of internally minted tokens, in seconds.
const INTERNAL_TOKEN_TTL_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Media,
    Lease,
}

/// Resource identifiers arrive as either strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Num(i64),
    Str(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,
    #[serde(default)]
    pub internal: bool,
    pub exp: i64,
}

/// Decoded capability of the current request. Request-scoped, never persisted.
#[derive(Debug, Clone)]
pub struct AuthResource {
    pub access: Access,
    pub id: Option<ResourceId>,
    pub internal: bool,
}

/// A `{access, id?}` pair a handler is willing to accept.
#[derive(Debug, Clone)]
pub struct ResourceScope {
    pub access: Access,
    pub id: Option<ResourceId>,
}

impl ResourceScope {
    pub fn access(access: Access) -> Self {
        Self { access, id: None }
    }

    fn matches(&self, auth: &AuthResource) -> bool {
        match &self.id {
            Some(id) => self.access == auth.access && Some(id) == auth.id.as_ref(),
            None => self.access == auth.access,
        }
    }
}

/// Required scope for an endpoint: a fixed resource list or any resource.
#[derive(Debug, Clone)]
pub enum Scope<'a> {
    Any,
    Resources(&'a [ResourceScope]),
}

/// Validate the request's bearer token and check it against `scope`.
///
/// `query_token` is only consulted for endpoints that explicitly allow
/// token-in-query delivery. 401 for a missing or undecodable token; 403 for
/// a valid token without sufficient scope.
pub fn authorize(
    secret: &str,
    headers: &HeaderMap,
    query_token: Option<&str>,
    scope: Scope<'_>,
) -> Result<AuthResource> {
    let token = bearer_token(headers, query_token)?;
    let auth = parse_token(secret, &token)?;

    if !auth.internal {
        return Err(Error::Forbidden(
            "Only Internal Tokens can access MediaServer".to_string(),
        ));
    }

    match scope {
        Scope::Any => Ok(auth),
        Scope::Resources([]) => Err(Error::Internal(
            "endpoint declared an empty resource scope".to_string(),
        )),
        Scope::Resources(resources) => {
            if resources.iter().any(|r| r.matches(&auth)) {
                Ok(auth)
            } else {
                Err(Error::Forbidden(
                    "Resource token cannot access this resource".to_string(),
                ))
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| Error::InvalidToken)?;
        let (kind, token) = value
            .split_once(' ')
            .ok_or(Error::AuthenticationRequired)?;

        if !kind.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return Err(Error::AuthenticationRequired);
        }

        Ok(token.to_string())
    } else if let Some(token) = query_token {
        Ok(token.to_string())
    } else {
        Err(Error::AuthenticationRequired)
    }
}

fn parse_token(secret: &str, token: &str) -> Result<AuthResource> {
    let token = token.strip_prefix(TOKEN_PREFIX).unwrap_or(token);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| Error::InvalidToken)?;

    // External (non-internal) tokens must be pinned to a resource id.
    if !data.claims.internal && data.claims.id.is_none() {
        return Err(Error::InvalidToken);
    }

    Ok(AuthResource {
        access: data.claims.access,
        id: data.claims.id,
        internal: data.claims.internal,
    })
}

/// Mint a short-lived internal token for calls to the remote lease API.
pub fn lease_token(secret: &str) -> String {
    let claims = Claims {
        access: Access::Lease,
        id: Some(ResourceId::Str("any".to_string())),
        internal: true,
        exp: chrono::Utc::now().timestamp() + INTERNAL_TOKEN_TTL_SECS,
    };

    // Encoding with an HMAC key cannot fail for serializable claims.
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap_or_default();

    format!("{}{}", TOKEN_PREFIX, token)
}

/// `Authorization` header value for the media server's management API.
pub fn management_header(media_secret: &str) -> String {
    let encoded = STANDARD.encode(format!("management:{}", media_secret));
    format!("Basic {}", encoded)
}
