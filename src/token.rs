//! Signed, expiring references to cached upstream resources.
//!
//! A token binds a stream name, a resource hash and a media type into an
//! opaque string: `base64url(json claims) + "." + hex(hmac-sha256(payload))`.
//! Verification fails closed: bad shape, bad signature, expiry and a
//! stream mismatch are all indistinguishable to the caller.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime in seconds.
pub const TOKEN_TTL_SECS: i64 = 600;

/// Media types a signed reference can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Ts,
    M4s,
    M3u8,
    Mp4,
}

impl MediaType {
    /// Map a URL path extension to a media type. The query string must
    /// already be stripped by the caller.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "ts" => Some(Self::Ts),
            "m4s" => Some(Self::M4s),
            "m3u8" => Some(Self::M3u8),
            "mp4" => Some(Self::Mp4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ts => "ts",
            Self::M4s => "m4s",
            Self::M3u8 => "m3u8",
            Self::Mp4 => "mp4",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Ts => "video/mp2t",
            Self::M4s => "video/iso.segment",
            Self::M3u8 => "application/vnd.apple.mpegurl",
            Self::Mp4 => "video/mp4",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    stream: String,
    hash: String,
    #[serde(rename = "type")]
    media_type: MediaType,
    exp: i64,
}

/// What a verified token grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub hash: String,
    pub media_type: MediaType,
}

/// HMAC-SHA256 signer for segment tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: Arc<[u8]>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").field("key", &"[REDACTED]").finish()
    }
}

impl TokenSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into().into(),
        }
    }

    /// Issue a token for a cached resource, valid for [`TOKEN_TTL_SECS`].
    pub fn issue(&self, stream: &str, hash: &str, media_type: MediaType) -> String {
        self.issue_at(stream, hash, media_type, chrono::Utc::now().timestamp())
    }

    fn issue_at(&self, stream: &str, hash: &str, media_type: MediaType, now: i64) -> String {
        let claims = TokenClaims {
            stream: stream.to_string(),
            hash: hash.to_string(),
            media_type,
            exp: now + TOKEN_TTL_SECS,
        };

        // Serializing a plain struct of strings and ints cannot fail.
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        format!("{}.{}", payload, self.sign(&payload))
    }

    /// Verify a token against the stream it is presented on.
    ///
    /// Returns `None` on any failure; callers must not be able to tell a
    /// forged signature from an expired or cross-stream token.
    pub fn verify(&self, stream: &str, token: &str) -> Option<TokenGrant> {
        self.verify_at(stream, token, chrono::Utc::now().timestamp())
    }

    fn verify_at(&self, stream: &str, token: &str, now: i64) -> Option<TokenGrant> {
        let (payload, sig) = token.split_once('.')?;
        let sig_bytes = hex::decode(sig).ok()?;

        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig_bytes).ok()?;

        let claims: TokenClaims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;

        if claims.exp < now || claims.stream != stream {
            return None;
        }

        Some(TokenGrant {
            hash: claims.hash,
            media_type: claims.media_type,
        })
    }

    /// Externally-safe relative path for a cached resource.
    pub fn signed_path(&self, stream: &str, hash: &str, media_type: MediaType) -> String {
        format!(
            "/stream/{}/segment.{}?token={}",
            stream,
            media_type.as_str(),
            self.issue(stream, hash, media_type)
        )
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-signing-key".to_vec())
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer();
        let token = signer.issue("s1", "abc-123", MediaType::Ts);
        let grant = signer.verify("s1", &token).unwrap();

        assert_eq!(grant.hash, "abc-123");
        assert_eq!(grant.media_type, MediaType::Ts);
    }

    #[test]
    fn test_cross_stream_reuse_fails() {
        let signer = signer();
        let token = signer.issue("s1", "abc-123", MediaType::Ts);

        assert!(signer.verify("s2", &token).is_none());
    }

    #[test]
    fn test_expired_token_fails_despite_valid_signature() {
        let signer = signer();
        let now = chrono::Utc::now().timestamp();
        let token = signer.issue_at("s1", "abc-123", MediaType::Ts, now - TOKEN_TTL_SECS - 1);

        assert!(signer.verify_at("s1", &token, now).is_none());
        // Sanity: the same token was valid at issuance time.
        assert!(signer
            .verify_at("s1", &token, now - TOKEN_TTL_SECS - 1)
            .is_some());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let signer = signer();
        let token = signer.issue("s1", "abc-123", MediaType::Ts);
        let (payload, sig) = token.split_once('.').unwrap();

        let forged_claims = serde_json::json!({
            "stream": "s1",
            "hash": "other-hash",
            "type": "ts",
            "exp": chrono::Utc::now().timestamp() + 600,
        });
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());

        assert!(signer.verify("s1", &format!("{}.{}", forged, sig)).is_none());
        assert!(signer.verify("s1", payload).is_none());
        assert!(signer.verify("s1", "not-a-token").is_none());
    }

    #[test]
    fn test_wrong_key_fails() {
        let token = signer().issue("s1", "abc-123", MediaType::M4s);
        let other = TokenSigner::new(b"other-key".to_vec());

        assert!(other.verify("s1", &token).is_none());
    }

    #[test]
    fn test_signed_path_shape() {
        let signer = signer();
        let path = signer.signed_path("s1", "abc-123", MediaType::M3u8);

        assert!(path.starts_with("/stream/s1/segment.m3u8?token="));
        let token = path.split("token=").nth(1).unwrap();
        assert_eq!(signer.verify("s1", token).unwrap().hash, "abc-123");
    }

    #[test]
    fn test_media_type_from_extension() {
        assert_eq!(MediaType::from_extension("ts"), Some(MediaType::Ts));
        assert_eq!(MediaType::from_extension("m3u8"), Some(MediaType::M3u8));
        assert_eq!(MediaType::from_extension("webm"), None);
        assert_eq!(MediaType::from_extension(""), None);
    }
}
