use colored::Colorize;
use std::fmt::Display;

use super::{CID_LENGTH, CID_MIN_LENGTH, DIGEST_B64_LENGTH};

#[derive(Debug)]
pub struct CidError {
    kind: CidErrorKind,
}

impl CidError {
    pub fn invalid_length(length: usize) -> Self {
        Self {
            kind: CidErrorKind::InvalidLength(length),
        }
    }

    pub fn invalid_characters(illegal: String) -> Self {
        Self {
            kind: CidErrorKind::InvalidCharacters(illegal),
        }
    }

    pub fn length_prefix(message: String) -> Self {
        Self {
            kind: CidErrorKind::LengthPrefix(message),
        }
    }

    pub fn embedded_content(expected: u64, actual: usize) -> Self {
        Self {
            kind: CidErrorKind::EmbeddedContent { expected, actual },
        }
    }

    pub fn embedded_decode(err: base64::DecodeError) -> Self {
        Self {
            kind: CidErrorKind::EmbeddedDecode(err),
        }
    }

    pub fn digest_length(actual: usize) -> Self {
        Self {
            kind: CidErrorKind::DigestLength(actual),
        }
    }

    pub fn content_too_large(size: u64) -> Self {
        Self {
            kind: CidErrorKind::ContentTooLarge(size),
        }
    }

    /// Name of the structural rule this error violated, used by the
    /// directory-mirror diagnostics.
    pub fn rule(&self) -> &'static str {
        match &self.kind {
            CidErrorKind::InvalidLength(_) => "length",
            CidErrorKind::InvalidCharacters(_) => "alphabet",
            CidErrorKind::LengthPrefix(_) => "length prefix",
            CidErrorKind::EmbeddedContent { .. } | CidErrorKind::EmbeddedDecode(_) => {
                "embedded content"
            }
            CidErrorKind::DigestLength(_) => "digest length",
            CidErrorKind::ContentTooLarge(_) => "content size",
        }
    }
}

#[derive(Debug)]
pub enum CidErrorKind {
    /// Candidate length is outside the permitted window
    InvalidLength(usize),
    /// Candidate contains characters outside the base64url set
    InvalidCharacters(String),
    /// The fixed-width length prefix did not parse
    LengthPrefix(String),
    /// Embedded content decoded to the wrong number of bytes
    EmbeddedContent { expected: u64, actual: usize },
    /// Embedded content was not valid base64url
    EmbeddedDecode(base64::DecodeError),
    /// Hashed payload is not an 86-character SHA-512 digest
    DigestLength(usize),
    /// Content length does not fit in the length prefix
    ContentTooLarge(u64),
}

impl Display for CidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = match &self.kind {
            CidErrorKind::InvalidLength(length) => format!(
                "CID length is {length}, but must be between {CID_MIN_LENGTH} and {CID_LENGTH}"
            ),
            CidErrorKind::InvalidCharacters(illegal) => format!(
                "CID contains characters outside the base64url set; illegal characters: {illegal:?}"
            ),
            CidErrorKind::LengthPrefix(message) => {
                format!("{} {message}", "LENGTH PREFIX:".underline())
            }
            CidErrorKind::EmbeddedContent { expected, actual } => format!(
                "embedded content decodes to {actual} bytes but the length prefix declares {expected}"
            ),
            CidErrorKind::EmbeddedDecode(err) => {
                format!("embedded content is not valid base64url: {err}")
            }
            CidErrorKind::DigestLength(actual) => format!(
                "hashed payload is {actual} characters, but a SHA-512 digest encodes to exactly {DIGEST_B64_LENGTH}"
            ),
            CidErrorKind::ContentTooLarge(size) => {
                format!("content of {size} bytes does not fit in the length prefix")
            }
        };

        f.write_str(&string)
    }
}

impl std::error::Error for CidError {}

impl From<base64::DecodeError> for CidError {
    fn from(value: base64::DecodeError) -> Self {
        Self::embedded_decode(value)
    }
}
