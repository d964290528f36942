//! Header names and header-borne values.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Session identifier.
pub const SYNC_SESSION_ID: &str = "rowsync-sync-session-id";
/// Scope name.
pub const SYNC_SCOPE_NAME: &str = "rowsync-sync-scope-name";
/// Numeric [`crate::HttpStep`] code.
pub const SYNC_STEP: &str = "rowsync-sync-step";
/// JSON [`SerializationFormat`].
pub const SYNC_SERIALIZATION_FORMAT: &str = "rowsync-sync-serialization-format";
/// Converter key, only when a converter is configured.
pub const SYNC_CONVERTER: &str = "rowsync-sync-converter";
/// Base64 SHA-256 of the body.
pub const SYNC_HASH: &str = "rowsync-sync-hash";
/// Present on failed responses whose body is an [`crate::ErrorEnvelope`].
pub const SYNC_ERROR: &str = "rowsync-sync-error";
/// Content type.
pub const CONTENT_TYPE: &str = "Content-Type";
/// Content type of JSON bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Session cookie set by the server.
pub const SET_COOKIE: &str = "Set-Cookie";
/// Session cookie replayed by the client.
pub const COOKIE: &str = "Cookie";

/// Every header the protocol owns; caller headers never override these.
pub const PROTOCOL_HEADERS: [&str; 7] = [
    SYNC_SESSION_ID,
    SYNC_SCOPE_NAME,
    SYNC_STEP,
    SYNC_SERIALIZATION_FORMAT,
    SYNC_CONVERTER,
    SYNC_HASH,
    CONTENT_TYPE,
];

/// Returns true if `name` is a protocol header (case-insensitive).
pub fn is_protocol_header(name: &str) -> bool {
    PROTOCOL_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Serializer key and batch size, as negotiated per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationFormat {
    /// Serializer key.
    #[serde(rename = "f")]
    pub serializer_key: String,
    /// Maximum rows per batch part; 0 means unbounded.
    #[serde(rename = "s")]
    pub batch_size: usize,
}

impl SerializationFormat {
    /// Creates a format descriptor.
    pub fn new(serializer_key: impl Into<String>, batch_size: usize) -> Self {
        Self {
            serializer_key: serializer_key.into(),
            batch_size,
        }
    }

    /// Header value (`{"f":"json","s":500}`).
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn to_header(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses the header value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHeader`] if the value is not the
    /// expected JSON object.
    pub fn from_header(value: &str) -> ProtocolResult<Self> {
        serde_json::from_str(value)
            .map_err(|_| ProtocolError::invalid_header(SYNC_SERIALIZATION_FORMAT, value))
    }
}

/// Base64 (standard alphabet) SHA-256 digest of a body. An empty body
/// hashes as zero bytes.
pub fn compute_hash(body: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(body))
}

/// Returns true if `expected` is the digest of `body`.
pub fn verify_hash(body: &[u8], expected: &str) -> bool {
    compute_hash(body) == expected.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_header_shape() {
        let format = SerializationFormat::new("json", 500);
        assert_eq!(format.to_header().unwrap(), r#"{"f":"json","s":500}"#);
        assert_eq!(
            SerializationFormat::from_header(r#"{"s":0,"f":"json"}"#).unwrap(),
            SerializationFormat::new("json", 0)
        );
        assert!(SerializationFormat::from_header("json").is_err());
    }

    #[test]
    fn empty_body_hash() {
        // SHA-256 of zero bytes.
        assert_eq!(
            compute_hash(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
        assert!(verify_hash(b"", "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="));
        assert!(!verify_hash(b"x", "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="));
    }

    #[test]
    fn protocol_headers_are_case_insensitive() {
        assert!(is_protocol_header("ROWSYNC-SYNC-HASH"));
        assert!(is_protocol_header("content-type"));
        assert!(!is_protocol_header("Authorization"));
    }

    proptest::proptest! {
        #[test]
        fn digest_matches_only_its_body(
            body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512),
            flip in proptest::prelude::any::<usize>(),
        ) {
            let hash = compute_hash(&body);
            proptest::prop_assert!(verify_hash(&body, &hash));
            if !body.is_empty() {
                let mut tampered = body.clone();
                let i = flip % tampered.len();
                tampered[i] ^= 0x01;
                proptest::prop_assert!(!verify_hash(&tampered, &hash));
            }
        }
    }
}
