//! Event type discriminator validation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Validation errors for [`EventType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventTypeValidationError {
    /// The discriminator was empty once trimmed.
    #[error("event type must not be empty")]
    Empty,
    /// The discriminator carried leading or trailing whitespace.
    #[error("event type must not contain surrounding whitespace")]
    Whitespace,
    /// The discriminator exceeded the storage column width.
    #[error("event type must be at most {max} characters, got {actual}")]
    TooLong {
        /// Maximum accepted length.
        max: usize,
        /// Observed length.
        actual: usize,
    },
}

/// String discriminator naming the kind of event carried by a message,
/// e.g. `UserCreated`.
///
/// # Example
///
/// ```
/// # use backbone::domain::outbox::EventType;
/// let event_type = EventType::new("UserCreated").expect("valid event type");
/// assert_eq!(event_type.as_ref(), "UserCreated");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    /// Maximum length accepted, matching the `event_type` column.
    pub const MAX_LEN: usize = 255;

    /// Validate and construct an [`EventType`].
    ///
    /// # Errors
    ///
    /// Returns [`EventTypeValidationError`] when the value is empty, padded
    /// with whitespace, or longer than [`Self::MAX_LEN`].
    pub fn new(value: impl Into<String>) -> Result<Self, EventTypeValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(EventTypeValidationError::Empty);
        }
        if value.trim() != value {
            return Err(EventTypeValidationError::Whitespace);
        }
        let actual = value.chars().count();
        if actual > Self::MAX_LEN {
            return Err(EventTypeValidationError::TooLong {
                max: Self::MAX_LEN,
                actual,
            });
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

impl TryFrom<String> for EventType {
    type Error = EventTypeValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
