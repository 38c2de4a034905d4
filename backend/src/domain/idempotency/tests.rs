//! Unit tests for idempotency primitives.

use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use rstest::rstest;
use serde_json::json;
use uuid::Uuid;

use super::*;

const KEY: &str = "550e8400-e29b-41d4-a716-446655440000";

#[rstest]
fn idempotency_key_accepts_valid_uuid() {
    let key = IdempotencyKey::new(KEY).expect("valid UUID should parse");
    assert_eq!(key.as_ref(), KEY);
}

#[rstest]
#[case(None, IdempotencyKeyValidationError::Missing)]
#[case(Some(""), IdempotencyKeyValidationError::Empty)]
#[case(Some("not-a-uuid"), IdempotencyKeyValidationError::Invalid)]
#[case(Some("550e8400-e29b-41d4-a716"), IdempotencyKeyValidationError::Invalid)]
#[case(Some(" 550e8400-e29b-41d4-a716-446655440000"), IdempotencyKeyValidationError::Invalid)]
#[case(Some("550e8400-e29b-41d4-a716-446655440000 "), IdempotencyKeyValidationError::Invalid)]
fn header_values_are_validated(
    #[case] raw: Option<&str>,
    #[case] expected: IdempotencyKeyValidationError,
) {
    assert_eq!(IdempotencyKey::from_header(raw), Err(expected));
}

#[rstest]
fn idempotency_key_keeps_uuid() {
    let uuid = Uuid::new_v4();
    assert_eq!(IdempotencyKey::from_uuid(uuid).as_uuid(), &uuid);
}

#[rstest]
fn idempotency_key_deserialisation_validates() {
    let result: Result<IdempotencyKey, _> = serde_json::from_value(json!("nope"));
    assert!(result.is_err());
}

#[rstest]
fn payload_hash_serialises_as_hex() {
    let hash = PayloadHash::from_bytes([0xab; 32]);
    let encoded = serde_json::to_value(&hash).expect("serialise hash");
    assert_eq!(encoded, json!("ab".repeat(32)));
    let decoded: PayloadHash = serde_json::from_value(encoded).expect("deserialise hash");
    assert_eq!(decoded, hash);
}

#[rstest]
#[case("zz", "not valid hex")]
#[case("abcd", "32 bytes")]
fn payload_hash_rejects_bad_hex(#[case] raw: &str, #[case] fragment: &str) {
    let err = PayloadHash::from_hex(raw).expect_err("invalid hash");
    assert!(err.to_string().contains(fragment), "{err}");
}

#[rstest]
#[case(json!({"z": 1, "a": 2, "m": 3}), json!({"a": 2, "m": 3, "z": 1}))]
#[case(json!({"outer": {"z": 1, "a": 2}}), json!({"outer": {"a": 2, "z": 1}}))]
fn canonical_hash_ignores_key_order(#[case] a: serde_json::Value, #[case] b: serde_json::Value) {
    assert_eq!(
        canonicalize_and_hash(&a).expect("hash a"),
        canonicalize_and_hash(&b).expect("hash b")
    );
}

#[rstest]
#[case(json!({"arr": [1, 2, 3]}), json!({"arr": [3, 2, 1]}))]
#[case(json!({"key": "value1"}), json!({"key": "value2"}))]
#[case(json!(null), json!(false))]
fn canonical_hash_distinguishes_content(
    #[case] a: serde_json::Value,
    #[case] b: serde_json::Value,
) {
    assert_ne!(
        canonicalize_and_hash(&a).expect("hash a"),
        canonicalize_and_hash(&b).expect("hash b")
    );
}

#[rstest]
#[case(199, false)]
#[case(200, true)]
#[case(201, true)]
#[case(299, true)]
#[case(300, false)]
#[case(409, false)]
fn only_2xx_statuses_are_successes(#[case] code: u16, #[case] success: bool) {
    assert_eq!(ResponseStatus::new(code).is_success(), success);
}

#[rstest]
fn guarded_responses_do_not_serialise_the_replay_flag() {
    let mut response = GuardedResponse::created(json!({"id": "abc"}));
    response.replayed = true;
    let encoded = serde_json::to_value(&response).expect("serialise response");
    assert_eq!(encoded, json!({"status": 201, "body": {"id": "abc"}}));
}

#[rstest]
fn cache_entries_are_tagged_by_state() {
    let claimed_at = Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("timestamp");
    let record = IdempotencyRecord {
        key: IdempotencyKey::new(KEY).expect("key"),
        status: ResponseStatus::CREATED,
        response_payload: json!({"id": "abc"}),
        payload_hash: canonicalize_and_hash(&json!({})).expect("hash"),
        created_at: claimed_at,
        expires_at: claimed_at + TimeDelta::hours(1),
    };

    let pending = serde_json::to_value(CacheEntry::claim(claimed_at)).expect("encode");
    assert_eq!(pending["state"], "pending");

    let completed = serde_json::to_value(CacheEntry::Completed(record.clone())).expect("encode");
    assert_eq!(completed["state"], "completed");
    let decoded: CacheEntry = serde_json::from_value(completed).expect("decode");
    assert_eq!(decoded, CacheEntry::Completed(record));
}

#[rstest]
fn records_expire_at_their_deadline() {
    let created_at = Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("timestamp");
    let record = IdempotencyRecord {
        key: IdempotencyKey::random(),
        status: ResponseStatus::OK,
        response_payload: json!(null),
        payload_hash: canonicalize_and_hash(&json!(null)).expect("hash"),
        created_at,
        expires_at: created_at + TimeDelta::seconds(10),
    };
    assert!(!record.is_expired(created_at + TimeDelta::seconds(9)));
    assert!(record.is_expired(created_at + TimeDelta::seconds(10)));
    assert!(record.to_replay().replayed);
}

#[rstest]
#[case(Duration::ZERO, Duration::from_secs(1))]
#[case(Duration::from_secs(90), Duration::from_secs(90))]
#[case(Duration::from_secs(365 * 24 * 3600), Duration::from_secs(30 * 24 * 3600))]
fn ttl_is_clamped(#[case] requested: Duration, #[case] effective: Duration) {
    assert_eq!(IdempotencyConfig::with_ttl(requested).ttl(), effective);
}

#[rstest]
fn defaults_favour_cache_only_with_a_one_hour_ttl() {
    let config = IdempotencyConfig::default();
    assert_eq!(config.ttl(), Duration::from_secs(3600));
    assert_eq!(config.claim_mode(), ClaimMode::CacheOnly);
}

#[rstest]
#[case("cache-only", ClaimMode::CacheOnly)]
#[case("CLAIM", ClaimMode::ClaimBeforeExecute)]
#[case(" claim-before-execute ", ClaimMode::ClaimBeforeExecute)]
fn claim_modes_parse(#[case] raw: &str, #[case] expected: ClaimMode) {
    assert_eq!(raw.parse::<ClaimMode>(), Ok(expected));
}

#[rstest]
fn unknown_claim_modes_are_rejected() {
    assert!("optimistic".parse::<ClaimMode>().is_err());
}
