//! Client-supplied idempotency key validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validation errors for [`IdempotencyKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyKeyValidationError {
    /// The request carried no key.
    #[error("idempotency key is required")]
    Missing,
    /// The key string was empty.
    #[error("idempotency key must not be empty")]
    Empty,
    /// The key string was not a valid UUID.
    #[error("idempotency key must be a valid UUID")]
    Invalid,
}

/// Client-provided idempotency key (a UUID).
///
/// Clients send this with every mutating request they may retry. The guard
/// uses it to detect duplicates and replay the first response. The original
/// string is kept so replays and logs show the key exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(Uuid, String);

impl IdempotencyKey {
    /// Validate and construct an [`IdempotencyKey`] from a string.
    ///
    /// # Errors
    ///
    /// [`IdempotencyKeyValidationError::Empty`] for an empty input and
    /// [`IdempotencyKeyValidationError::Invalid`] for anything that is not a
    /// UUID, including values padded with whitespace.
    ///
    /// # Example
    ///
    /// ```
    /// # use backbone::domain::idempotency::IdempotencyKey;
    /// let key = IdempotencyKey::new("550e8400-e29b-41d4-a716-446655440000")
    ///     .expect("valid UUID");
    /// assert_eq!(key.as_ref(), "550e8400-e29b-41d4-a716-446655440000");
    /// ```
    pub fn new(key: impl AsRef<str>) -> Result<Self, IdempotencyKeyValidationError> {
        Self::from_owned(key.as_ref().to_owned())
    }

    /// Validate an optional raw header value.
    ///
    /// # Errors
    ///
    /// [`IdempotencyKeyValidationError::Missing`] when `raw` is `None`,
    /// otherwise as [`Self::new`].
    pub fn from_header(raw: Option<&str>) -> Result<Self, IdempotencyKeyValidationError> {
        raw.ok_or(IdempotencyKeyValidationError::Missing)
            .and_then(Self::new)
    }

    /// Construct from an already validated UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, uuid.to_string())
    }

    /// Generate a new random key.
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    fn from_owned(key: String) -> Result<Self, IdempotencyKeyValidationError> {
        if key.is_empty() {
            return Err(IdempotencyKeyValidationError::Empty);
        }
        if key.trim() != key {
            return Err(IdempotencyKeyValidationError::Invalid);
        }
        let parsed = Uuid::parse_str(&key).map_err(|_| IdempotencyKeyValidationError::Invalid)?;
        Ok(Self(parsed, key))
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        self.1.as_str()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.1
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = IdempotencyKeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}
