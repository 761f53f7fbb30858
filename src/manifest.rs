//! HLS playlist rewriting.
//!
//! Every media reference in a playlist is replaced by a signed relative URL
//! and the real upstream URL is cached under a fresh hash, so clients never
//! see an upstream address. Line order and count are preserved and any
//! directive the rewriter does not recognize passes through untouched.

use url::Url;
use uuid::Uuid;

use crate::{
    cache::ResourceCache,
    token::{MediaType, TokenSigner},
    Error, Result,
};

const MAGIC: &str = "#EXTM3U";
const MAP_PREFIX: &str = "#EXT-X-MAP:URI=";
const MEDIA_PREFIX: &str = "#EXT-X-MEDIA:TYPE";

/// Rewrite a playlist fetched from `base_url` for the given stream.
///
/// Rejects input that does not begin with the `#EXTM3U` magic line and
/// references whose media type cannot be derived from the URL extension.
pub fn rewrite(
    content: &str,
    base_url: &Url,
    stream: &str,
    signer: &TokenSigner,
    cache: &ResourceCache,
) -> Result<String> {
    if !content.starts_with(MAGIC) {
        return Err(Error::InvalidManifest);
    }

    let transformed = content
        .split('\n')
        .map(|line| rewrite_line(line, base_url, stream, signer, cache))
        .collect::<Result<Vec<_>>>()?;

    Ok(transformed.join("\n"))
}

fn rewrite_line(
    line: &str,
    base_url: &Url,
    stream: &str,
    signer: &TokenSigner,
    cache: &ResourceCache,
) -> Result<String> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Ok(line.to_string());
    }

    // Init segment directive: the map target is always fMP4.
    if let Some(raw) = trimmed.strip_prefix(MAP_PREFIX) {
        let uri = raw.trim_matches('"');
        let signed = sign_reference(uri, base_url, stream, MediaType::Mp4, signer, cache)?;
        return Ok(format!("{}\"{}\"", MAP_PREFIX, signed));
    }

    // Rendition directive: rewrite the URI attribute when present, e.g.
    // #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="audio",NAME="Espanol",URI="sp/prog_index.m3u8"
    // The URI is omitted entirely for renditions without their own playlist.
    if trimmed.starts_with(MEDIA_PREFIX) {
        if let Some((head, tail)) = trimmed.split_once("URI=") {
            let (uri, rest) = split_quoted(tail);
            let signed = sign_reference(uri, base_url, stream, MediaType::M3u8, signer, cache)?;
            return Ok(format!("{}URI=\"{}\"{}", head, signed, rest));
        }
        return Ok(line.to_string());
    }

    // Any other directive or comment passes through unchanged.
    if trimmed.starts_with('#') {
        return Ok(line.to_string());
    }

    // A bare line is a media reference; its type comes from the extension.
    let resolved = base_url.join(trimmed)?;
    let ext = extension(&resolved);
    let media_type = MediaType::from_extension(ext)
        .ok_or_else(|| Error::UnsupportedSegment(format!(".{}", ext)))?;

    let hash = Uuid::new_v4().to_string();
    cache.put(stream, &hash, resolved.as_str());
    Ok(signer.signed_path(stream, &hash, media_type))
}

fn sign_reference(
    uri: &str,
    base_url: &Url,
    stream: &str,
    media_type: MediaType,
    signer: &TokenSigner,
    cache: &ResourceCache,
) -> Result<String> {
    let resolved = base_url.join(uri)?;
    let hash = Uuid::new_v4().to_string();
    cache.put(stream, &hash, resolved.as_str());
    Ok(signer.signed_path(stream, &hash, media_type))
}

/// Split a `"quoted value"` off the front of an attribute tail, returning
/// the value and whatever follows the closing quote.
fn split_quoted(tail: &str) -> (&str, &str) {
    if let Some(inner) = tail.strip_prefix('"') {
        if let Some(end) = inner.find('"') {
            return (&inner[..end], &inner[end + 1..]);
        }
    }
    (tail.trim_matches('"'), "")
}

/// Extension of a URL's path component, query excluded.
fn extension(url: &Url) -> &str {
    let path = url.path();
    match path.rsplit_once('/') {
        Some((_, file)) => file.rsplit_once('.').map(|(_, ext)| ext).unwrap_or(""),
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Url, TokenSigner, ResourceCache) {
        (
            Url::parse("https://origin.example.com/live/index.m3u8").unwrap(),
            TokenSigner::new(b"test-signing-key".to_vec()),
            ResourceCache::default(),
        )
    }

    fn token_of(reference: &str) -> &str {
        reference.split("token=").nth(1).unwrap()
    }

    #[test]
    fn test_rejects_manifest_without_magic() {
        let (base, signer, cache) = setup();
        let err = rewrite("not a playlist", &base, "s1", &signer, &cache).unwrap_err();
        assert!(matches!(err, Error::InvalidManifest));
    }

    #[test]
    fn test_rewrites_media_tag_and_segment() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,URI=\"a.m3u8\"\nseg1.ts";

        let output = rewrite(input, &base, "s1", &signer, &cache).unwrap();
        let lines: Vec<&str> = output.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "#EXTM3U");

        // Rendition line keeps its shape with a signed URI.
        assert!(lines[1].starts_with("#EXT-X-MEDIA:TYPE=AUDIO,URI=\"/stream/s1/segment.m3u8?token="));
        let uri = lines[1].split('"').nth(1).unwrap();
        let grant = signer.verify("s1", token_of(uri)).unwrap();
        assert_eq!(grant.media_type, MediaType::M3u8);
        assert_eq!(
            cache.get("s1", &grant.hash).as_deref(),
            Some("https://origin.example.com/live/a.m3u8")
        );

        // Segment line becomes a bare signed reference.
        assert!(lines[2].starts_with("/stream/s1/segment.ts?token="));
        let grant = signer.verify("s1", token_of(lines[2])).unwrap();
        assert_eq!(grant.media_type, MediaType::Ts);
        assert_eq!(
            cache.get("s1", &grant.hash).as_deref(),
            Some("https://origin.example.com/live/seg1.ts")
        );
    }

    #[test]
    fn test_preserves_line_count_and_unknown_directives() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\n#EXT-X-VERSION:3\n\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg1.ts\n";

        let output = rewrite(input, &base, "s1", &signer, &cache).unwrap();
        let lines: Vec<&str> = output.split('\n').collect();

        assert_eq!(lines.len(), 7);
        assert_eq!(lines[1], "#EXT-X-VERSION:3");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "#EXT-X-TARGETDURATION:6");
        assert_eq!(lines[4], "#EXTINF:6.0,");
        assert_eq!(lines[6], "");
    }

    #[test]
    fn test_rewrites_map_directive_as_mp4() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\nseg1.m4s";

        let output = rewrite(input, &base, "s1", &signer, &cache).unwrap();
        let map_line = output.split('\n').nth(1).unwrap();

        assert!(map_line.starts_with("#EXT-X-MAP:URI=\"/stream/s1/segment.mp4?token="));
        let uri = map_line.split('"').nth(1).unwrap();
        let grant = signer.verify("s1", token_of(uri)).unwrap();
        assert_eq!(grant.media_type, MediaType::Mp4);
        assert_eq!(
            cache.get("s1", &grant.hash).as_deref(),
            Some("https://origin.example.com/live/init.mp4")
        );
    }

    #[test]
    fn test_media_tag_without_uri_passes_through() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\n#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"English\"";

        let output = rewrite(input, &base, "s1", &signer, &cache).unwrap();
        assert_eq!(
            output.split('\n').nth(1).unwrap(),
            "#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"English\""
        );
    }

    #[test]
    fn test_media_tag_preserves_attributes_after_uri() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,URI=\"a.m3u8\",DEFAULT=YES";

        let output = rewrite(input, &base, "s1", &signer, &cache).unwrap();
        let line = output.split('\n').nth(1).unwrap();

        assert!(line.starts_with("#EXT-X-MEDIA:TYPE=AUDIO,URI=\""));
        assert!(line.ends_with(",DEFAULT=YES"));
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\nseg1.webm";

        let err = rewrite(input, &base, "s1", &signer, &cache).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSegment(_)));
    }

    #[test]
    fn test_reference_extension_ignores_query() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\nseg1.ts?auth=abc";

        let output = rewrite(input, &base, "s1", &signer, &cache).unwrap();
        let reference = output.split('\n').nth(1).unwrap();
        let grant = signer.verify("s1", token_of(reference)).unwrap();

        assert_eq!(grant.media_type, MediaType::Ts);
        assert_eq!(
            cache.get("s1", &grant.hash).as_deref(),
            Some("https://origin.example.com/live/seg1.ts?auth=abc")
        );
    }

    #[test]
    fn test_fresh_hash_per_rewrite_pass() {
        let (base, signer, cache) = setup();
        let input = "#EXTM3U\nseg1.ts";

        let first = rewrite(input, &base, "s1", &signer, &cache).unwrap();
        let second = rewrite(input, &base, "s1", &signer, &cache).unwrap();

        let first_hash = signer
            .verify("s1", token_of(first.split('\n').nth(1).unwrap()))
            .unwrap()
            .hash;
        let second_hash = signer
            .verify("s1", token_of(second.split('\n').nth(1).unwrap()))
            .unwrap()
            .hash;

        assert_ne!(first_hash, second_hash);
        assert!(cache.get("s1", &first_hash).is_some());
        assert!(cache.get("s1", &second_hash).is_some());
    }
}
