//! The CID codec.
//!
//! A CID is a base64url string with a fixed-width length prefix followed by
//! a payload. The prefix encodes the original content byte count as a
//! big-endian base64url integer. Content up to [`DIRECT_CONTENT_EMBED_LIMIT`]
//! bytes is embedded in the payload directly; anything larger is represented
//! by its SHA-512 digest, so the bytes must be recovered from the store.

mod error;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt::Display;
use std::str::FromStr;

pub use error::{CidError, CidErrorKind};

/// Characters of the fixed-width length prefix
pub const CID_LENGTH_PREFIX_CHARS: usize = 8;
/// Largest content size that is embedded into the CID itself
pub const DIRECT_CONTENT_EMBED_LIMIT: usize = 64;
/// Characters of an unpadded base64url SHA-512 digest
pub const DIGEST_B64_LENGTH: usize = 86;
/// Shortest possible CID: a length prefix with an empty payload
pub const CID_MIN_LENGTH: usize = CID_LENGTH_PREFIX_CHARS;
/// Longest possible CID: a length prefix followed by a SHA-512 digest
pub const CID_LENGTH: usize = CID_LENGTH_PREFIX_CHARS + DIGEST_B64_LENGTH;

const BASE64URL_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// A validated, normalized CID value (no leading slash, no extension).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(String);

impl Cid {
    /// Compute the CID naming `content`.
    pub fn generate(content: &[u8]) -> Self {
        let prefix = encode_cid_length(content.len() as u64)
            .expect("content length always fits the prefix on 48-bit-addressable content");
        let payload = if content.len() <= DIRECT_CONTENT_EMBED_LIMIT {
            URL_SAFE_NO_PAD.encode(content)
        } else {
            URL_SAFE_NO_PAD.encode(Sha512::digest(content))
        };
        Self(format!("{prefix}{payload}"))
    }

    /// Validate and wrap an existing CID string.
    pub fn parse(value: &str) -> Result<Self, CidError> {
        parse_cid_components(value)?;
        Ok(Self(value.to_string()))
    }

    /// The underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The store path for this CID: `/` + value.
    pub fn store_path(&self) -> String {
        format!("/{}", self.0)
    }

    /// Declared content length in bytes.
    pub fn content_length(&self) -> u64 {
        decode_cid_length(&self.0[..CID_LENGTH_PREFIX_CHARS])
            .expect("validated on construction")
    }

    /// Embedded content for a literal CID, recovered without a store hit.
    pub fn embedded_content(&self) -> Option<Vec<u8>> {
        match parse_cid_components(&self.0).expect("validated on construction").1 {
            CidPayload::Direct(bytes) => Some(bytes),
            CidPayload::Digest(_) => None,
        }
    }
}

impl Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Cid {
    type Error = CidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Cid> for String {
    fn from(value: Cid) -> Self {
        value.0
    }
}

/// Decoded payload of a CID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidPayload {
    /// The content itself, for content within the embed limit
    Direct(Vec<u8>),
    /// The 64-byte SHA-512 digest of the content
    Digest(Vec<u8>),
}

/// Encode a content length as the fixed-width big-endian base64url prefix.
pub fn encode_cid_length(length: u64) -> Result<String, CidError> {
    if length >> (6 * CID_LENGTH_PREFIX_CHARS as u64) != 0 {
        return Err(CidError::content_too_large(length));
    }
    let mut prefix = String::with_capacity(CID_LENGTH_PREFIX_CHARS);
    for position in (0..CID_LENGTH_PREFIX_CHARS).rev() {
        let digit = (length >> (6 * position as u64)) & 0x3f;
        prefix.push(BASE64URL_ALPHABET[digit as usize] as char);
    }
    Ok(prefix)
}

/// Decode the fixed-width length prefix back into a byte count.
pub fn decode_cid_length(prefix: &str) -> Result<u64, CidError> {
    if prefix.len() != CID_LENGTH_PREFIX_CHARS {
        return Err(CidError::length_prefix(format!(
            "expected {CID_LENGTH_PREFIX_CHARS} characters, got {}",
            prefix.len()
        )));
    }
    let mut length: u64 = 0;
    for ch in prefix.chars() {
        let digit = BASE64URL_ALPHABET
            .iter()
            .position(|&candidate| candidate as char == ch)
            .ok_or_else(|| {
                CidError::length_prefix(format!("character {ch:?} is not a base64url digit"))
            })?;
        length = (length << 6) | digit as u64;
    }
    Ok(length)
}

/// Split a CID string into its declared content length and decoded payload.
pub fn parse_cid_components(candidate: &str) -> Result<(u64, CidPayload), CidError> {
    if candidate.len() < CID_MIN_LENGTH || candidate.len() > CID_LENGTH {
        return Err(CidError::invalid_length(candidate.len()));
    }

    let illegal: String = candidate
        .chars()
        .filter(|ch| !BASE64URL_ALPHABET.contains(&(*ch as u8)) || !ch.is_ascii())
        .collect();
    if !illegal.is_empty() {
        return Err(CidError::invalid_characters(illegal));
    }

    let (prefix, payload) = candidate.split_at(CID_LENGTH_PREFIX_CHARS);
    let content_length = decode_cid_length(prefix)?;

    if content_length <= DIRECT_CONTENT_EMBED_LIMIT as u64 {
        let content = URL_SAFE_NO_PAD.decode(payload)?;
        if content.len() as u64 != content_length {
            return Err(CidError::embedded_content(content_length, content.len()));
        }
        Ok((content_length, CidPayload::Direct(content)))
    } else {
        if payload.len() != DIGEST_B64_LENGTH {
            return Err(CidError::digest_length(payload.len()));
        }
        let digest = URL_SAFE_NO_PAD.decode(payload)?;
        Ok((content_length, CidPayload::Digest(digest)))
    }
}

/// Whether `candidate` is a canonical CID in normalized form.
pub fn is_normalized_cid(candidate: &str) -> bool {
    parse_cid_components(candidate).is_ok()
}

/// Strip leading slashes and surrounding whitespace from a CID reference.
pub fn format_cid(value: &str) -> String {
    value.trim().trim_start_matches('/').to_string()
}

/// Relative path serving a CID, optionally with an extension appended.
pub fn cid_path(value: &str, extension: Option<&str>) -> Option<String> {
    let normalized = format_cid(value);
    if normalized.is_empty() {
        return None;
    }
    match extension.map(str::trim).filter(|ext| !ext.is_empty()) {
        Some(ext) => Some(format!("/{normalized}.{}", ext.trim_start_matches('.'))),
        None => Some(format!("/{normalized}")),
    }
}

/// Split a request path into its CID component and trailing extension text.
///
/// `/{cid}` yields no extension; `/{cid}.txt` yields `txt`; a path with a
/// filename such as `/{cid}.report.pdf` yields `report.pdf`. Query strings
/// and fragments are discarded. Paths with interior slashes are not CID
/// paths.
pub fn split_cid_path(path: &str) -> Option<(String, Option<String>)> {
    let mut slug = path.trim();
    slug = slug.split('?').next().unwrap_or_default();
    slug = slug.split('#').next().unwrap_or_default();
    let slug = slug.strip_prefix('/').unwrap_or(slug);
    if slug.is_empty() || slug.contains('/') {
        return None;
    }

    let (cid_part, extension) = match slug.split_once('.') {
        Some((cid_part, rest)) => (cid_part, Some(rest.to_string())),
        None => (slug, None),
    };

    if !is_probable_cid_component(cid_part) {
        return None;
    }
    Some((cid_part.to_string(), extension))
}

/// Quick shape check used before consulting the store: base64url characters
/// only, long enough to plausibly be a CID.
pub fn is_probable_cid_component(candidate: &str) -> bool {
    candidate.len() >= 6
        && candidate
            .chars()
            .all(|ch| ch.is_ascii() && BASE64URL_ALPHABET.contains(&(ch as u8)))
}

/// Strict candidate check: shape plus length window and parseable prefix.
pub fn is_strict_cid_candidate(candidate: &str) -> bool {
    is_probable_cid_component(candidate)
        && candidate.len() >= CID_MIN_LENGTH
        && candidate.len() <= CID_LENGTH
        && decode_cid_length(&candidate[..CID_LENGTH_PREFIX_CHARS]).is_ok()
}

/// Multi-line diagnostic for a filename that failed CID validation, quoting
/// the exact rule violated. Used by the directory-mirror loader.
pub fn describe_invalid_cid(filename: &str) -> String {
    let raw = filename;
    let stripped = raw.trim();
    let normalized = stripped.trim_start_matches('/');

    let mut lines: Vec<String> = Vec::new();
    lines.push("What the CID store expects:".to_string());
    lines.push(
        "  - CID filenames must use base64url characters (A-Z a-z 0-9 '_' '-').".to_string(),
    );
    lines.push(format!(
        "  - Length must be between {CID_MIN_LENGTH} and {CID_LENGTH} characters (inclusive)."
    ));
    lines.push(format!(
        "  - The first {CID_LENGTH_PREFIX_CHARS} characters encode the original content length."
    ));
    lines.push(format!(
        "  - If content length <= {DIRECT_CONTENT_EMBED_LIMIT}, the remaining characters embed the content bytes."
    ));
    lines.push(format!(
        "  - If content length > {DIRECT_CONTENT_EMBED_LIMIT} bytes, the remaining characters must be an {DIGEST_B64_LENGTH}-character SHA-512 digest."
    ));

    if stripped != raw {
        lines.push(format!(
            "Filename has leading/trailing whitespace; stripped={stripped:?}."
        ));
    }
    if normalized != stripped {
        lines.push(
            "Filename starts with '/', but CID filenames must not include leading slashes."
                .to_string(),
        );
    }
    if normalized.contains('/') {
        lines.push(
            "Filename contains '/', but CID filenames must be a single path component."
                .to_string(),
        );
    }
    if normalized.is_empty() {
        lines.push("Filename is empty after normalization.".to_string());
        return lines.join("\n");
    }

    match parse_cid_components(normalized) {
        Ok((content_length, _)) => {
            lines.push(format!(
                "Parsed length prefix indicates original content length = {content_length} bytes."
            ));
        }
        Err(err) => {
            lines.push(format!(
                "CID structural validation failed ({} rule): {err}.",
                err.rule()
            ));
        }
    }

    lines.push("How to fix:".to_string());
    lines.push(
        "  - If this file is not meant to be a CID fixture, move it out of the cids/ directory."
            .to_string(),
    );
    lines.push(
        "  - If it is meant to be a CID fixture, rename it so the filename equals the CID generated from the file bytes."
            .to_string(),
    );
    lines.join("\n")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_content_has_the_all_zero_prefix() {
        let cid = Cid::generate(b"");
        assert_eq!(cid.as_str(), "AAAAAAAA");
        assert_eq!(cid.content_length(), 0);
        assert_eq!(cid.embedded_content(), Some(Vec::new()));
    }

    #[test]
    fn direct_content_round_trips_at_every_length() {
        for length in 0..=DIRECT_CONTENT_EMBED_LIMIT {
            let sequential: Vec<u8> = (0..length).map(|index| (index % 256) as u8).collect();
            let offset: Vec<u8> = (0..length).map(|index| ((index + 127) % 256) as u8).collect();
            for content in [sequential, offset] {
                let cid = Cid::generate(&content);
                let (parsed_length, payload) = parse_cid_components(cid.as_str()).unwrap();
                assert_eq!(parsed_length as usize, content.len());
                assert_eq!(payload, CidPayload::Direct(content.clone()));
                assert!(cid.as_str().len() >= CID_MIN_LENGTH);
                assert!(cid.as_str().len() <= CID_LENGTH);
                assert!(is_normalized_cid(cid.as_str()));
            }
        }
    }

    #[test]
    fn hashed_content_parses_to_its_digest() {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        for size in [DIRECT_CONTENT_EMBED_LIMIT + 1, 512, 64 * 1024] {
            let mut content = vec![0u8; size];
            rng.fill_bytes(&mut content);
            let cid = Cid::generate(&content);
            assert_eq!(cid.as_str().len(), CID_LENGTH);
            let (parsed_length, payload) = parse_cid_components(cid.as_str()).unwrap();
            assert_eq!(parsed_length as usize, size);
            assert_eq!(
                payload,
                CidPayload::Digest(Sha512::digest(&content).to_vec())
            );
            assert!(cid.embedded_content().is_none());
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let content = b"deterministic test content";
        let cids: Vec<Cid> = (0..10).map(|_| Cid::generate(content)).collect();
        assert!(cids.iter().all(|cid| cid == &cids[0]));
    }

    #[test]
    fn malformed_candidates_are_rejected() {
        assert!(!is_normalized_cid("short"));
        assert!(!is_normalized_cid(""));
        assert!(!is_normalized_cid("AAAAAAA!"));
        let cid = Cid::generate(b"helper utilities");
        assert!(!is_normalized_cid(&format!("{cid}extra")));
        // Prefix declares one byte but the payload embeds none.
        assert!(!is_normalized_cid("AAAAAAAB"));
    }

    #[test]
    fn length_prefix_round_trips() {
        for length in [0u64, 1, 63, 64, 65, 4096, (1 << 48) - 1] {
            let prefix = encode_cid_length(length).unwrap();
            assert_eq!(prefix.len(), CID_LENGTH_PREFIX_CHARS);
            assert_eq!(decode_cid_length(&prefix).unwrap(), length);
        }
        assert!(encode_cid_length(1 << 48).is_err());
    }

    #[test]
    fn path_splitting_handles_extensions_and_modifiers() {
        let cid = Cid::generate(b"helper utilities");
        let value = cid.as_str();
        assert_eq!(
            split_cid_path(&format!("/{value}")),
            Some((value.to_string(), None))
        );
        assert_eq!(
            split_cid_path(&format!("/{value}.json")),
            Some((value.to_string(), Some("json".to_string())))
        );
        assert_eq!(
            split_cid_path(&format!("/{value}.html?download=1")),
            Some((value.to_string(), Some("html".to_string())))
        );
        assert_eq!(
            split_cid_path(&format!("/{value}.txt#section")),
            Some((value.to_string(), Some("txt".to_string())))
        );
        assert_eq!(
            split_cid_path(&format!("/{value}.report.pdf")),
            Some((value.to_string(), Some("report.pdf".to_string())))
        );
        assert_eq!(split_cid_path("/not/a/cid"), None);
        assert_eq!(split_cid_path(""), None);
    }

    #[test]
    fn diagnostics_quote_the_violated_rule() {
        assert!(describe_invalid_cid("abc!def").contains("base64url"));
        assert!(describe_invalid_cid("abc").contains("Length must be between"));
        let diagnostic = describe_invalid_cid("AAAAAAAB");
        assert!(diagnostic.contains("embedded content"));
    }
}
