//! Cached responses and cache entry states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{IdempotencyKey, PayloadHash};

/// HTTP-style status code attached to a guarded response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseStatus(u16);

impl ResponseStatus {
    /// `200 OK`.
    pub const OK: Self = Self(200);
    /// `201 Created`.
    pub const CREATED: Self = Self(201);
    /// `202 Accepted`.
    pub const ACCEPTED: Self = Self(202);

    /// Wrap a raw status code.
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Raw status code.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Whether the status is in the 2xx range. Only these are cached.
    pub const fn is_success(self) -> bool {
        matches!(self.0, 200..=299)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Response produced by, or replayed for, a guarded operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardedResponse {
    /// Status code.
    pub status: ResponseStatus,
    /// JSON body.
    pub body: Value,
    /// `true` when served from the cache instead of executing the operation.
    #[serde(skip)]
    pub replayed: bool,
}

impl GuardedResponse {
    /// A freshly produced response.
    pub fn new(status: ResponseStatus, body: Value) -> Self {
        Self {
            status,
            body,
            replayed: false,
        }
    }

    /// `200 OK` with `body`.
    pub fn ok(body: Value) -> Self {
        Self::new(ResponseStatus::OK, body)
    }

    /// `201 Created` with `body`.
    pub fn created(body: Value) -> Self {
        Self::new(ResponseStatus::CREATED, body)
    }
}

/// Stored outcome of the first successful execution under a key.
///
/// Immutable once written; ignored after `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client key the response is stored under.
    pub key: IdempotencyKey,
    /// Status of the original response.
    pub status: ResponseStatus,
    /// Body of the original response.
    pub response_payload: Value,
    /// Fingerprint of the original request payload.
    pub payload_hash: PayloadHash,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the record stops being replayed.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the record has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The stored response, flagged as a replay.
    pub fn to_replay(&self) -> GuardedResponse {
        GuardedResponse {
            status: self.status,
            body: self.response_payload.clone(),
            replayed: true,
        }
    }
}

/// Value stored in an [`crate::domain::ports::IdempotencyCache`] under a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CacheEntry {
    /// A request holds the key and is executing. Only written in claim mode.
    Pending {
        /// When the claim was taken.
        claimed_at: DateTime<Utc>,
        /// Distinguishes claims taken at the same instant.
        claim_id: Uuid,
    },
    /// The first successful response.
    Completed(IdempotencyRecord),
}

impl CacheEntry {
    /// A fresh pending claim taken at `claimed_at`.
    pub fn claim(claimed_at: DateTime<Utc>) -> Self {
        Self::Pending {
            claimed_at,
            claim_id: Uuid::new_v4(),
        }
    }
}
