//! Request payload fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Errors raised while building a [`PayloadHash`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadHashError {
    /// The input did not decode to 32 bytes.
    #[error("payload hash must be 32 bytes of hex, got {actual} bytes")]
    InvalidLength {
        /// Decoded byte count.
        actual: usize,
    },
    /// The input was not hexadecimal.
    #[error("payload hash is not valid hex: {message}")]
    InvalidHex {
        /// Decoder failure description.
        message: String,
    },
    /// The canonical JSON could not be serialised.
    #[error("failed to serialise canonical JSON payload: {message}")]
    Serialization {
        /// Serializer failure description.
        message: String,
    },
}

/// SHA-256 fingerprint of a canonicalised request payload.
///
/// Stored beside cached responses so a replay for a different body can be
/// logged. It never changes what is replayed. Serialises as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PayloadHash([u8; 32]);

impl PayloadHash {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a lowercase or uppercase hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadHashError`] for non-hex input or a wrong length.
    pub fn from_hex(raw: &str) -> Result<Self, PayloadHashError> {
        let bytes = hex::decode(raw).map_err(|err| PayloadHashError::InvalidHex {
            message: err.to_string(),
        })?;
        let actual = bytes.len();
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PayloadHashError::InvalidLength { actual })?;
        Ok(Self(arr))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<PayloadHash> for String {
    fn from(value: PayloadHash) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for PayloadHash {
    type Error = PayloadHashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// Canonicalise a JSON value and hash it.
///
/// Object keys are sorted recursively, arrays keep their order, and the
/// result is hashed as compact JSON, so equivalent payloads hash equally
/// regardless of key order or whitespace.
///
/// # Example
///
/// ```
/// # use backbone::domain::idempotency::canonicalize_and_hash;
/// # use serde_json::json;
/// let a = canonicalize_and_hash(&json!({"b": 2, "a": 1})).expect("hash");
/// let b = canonicalize_and_hash(&json!({"a": 1, "b": 2})).expect("hash");
/// assert_eq!(a, b);
/// ```
pub fn canonicalize_and_hash(value: &Value) -> Result<PayloadHash, PayloadHashError> {
    let bytes = serde_json::to_vec(&canonicalize(value)).map_err(|err| {
        PayloadHashError::Serialization {
            message: err.to_string(),
        }
    })?;
    Ok(PayloadHash(Sha256::digest(&bytes).into()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by_key(|(key, _)| key.as_str());
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, nested)| (key.clone(), canonicalize(nested)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
