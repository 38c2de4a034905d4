//! Tests for outbox message construction and state transitions.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rstest::{fixture, rstest};
use serde::Serialize;
use serde_json::json;

use super::*;

#[derive(Serialize)]
struct UserCreated {
    user_id: String,
}

impl DomainEvent for UserCreated {
    const EVENT_TYPE: &'static str = "UserCreated";
}

#[derive(Serialize)]
struct Nameless;

impl DomainEvent for Nameless {
    const EVENT_TYPE: &'static str = " ";
}

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

#[fixture]
fn message(now: DateTime<Utc>) -> OutboxMessage {
    OutboxMessage::new(
        EventType::new("UserCreated").expect("event type"),
        "users",
        json!({"userId": "u-1"}),
        now,
    )
}

#[rstest]
#[case("", EventTypeValidationError::Empty)]
#[case("   ", EventTypeValidationError::Empty)]
#[case(" UserCreated", EventTypeValidationError::Whitespace)]
fn event_type_rejects_invalid_values(
    #[case] raw: &str,
    #[case] expected: EventTypeValidationError,
) {
    assert_eq!(EventType::new(raw), Err(expected));
}

#[rstest]
fn event_type_rejects_overlong_values() {
    let raw = "e".repeat(EventType::MAX_LEN + 1);
    assert!(matches!(
        EventType::new(raw),
        Err(EventTypeValidationError::TooLong { actual, .. }) if actual == EventType::MAX_LEN + 1
    ));
}

#[rstest]
fn event_type_deserialisation_validates() {
    let result: Result<EventType, _> = serde_json::from_value(json!(""));
    assert!(result.is_err());
}

#[rstest]
fn new_messages_start_unprocessed_and_due(message: OutboxMessage, now: DateTime<Utc>) {
    assert!(!message.is_processed());
    assert_eq!(message.retry_count, 0);
    assert_eq!(message.error, None);
    assert_eq!(message.next_attempt_at, now);
    assert_eq!(message.source, "users");
}

#[rstest]
fn messages_get_distinct_ids(now: DateTime<Utc>) {
    let first = OutboxMessage::for_event(&UserCreated { user_id: "a".into() }, "users", now)
        .expect("message");
    let second = OutboxMessage::for_event(&UserCreated { user_id: "a".into() }, "users", now)
        .expect("message");
    assert_ne!(first.id, second.id);
}

#[rstest]
fn for_event_serialises_the_payload(now: DateTime<Utc>) {
    let event = UserCreated {
        user_id: "u-9".to_owned(),
    };
    let message = OutboxMessage::for_event(&event, "users", now).expect("message");
    assert_eq!(message.event_type.as_ref(), "UserCreated");
    assert_eq!(message.payload, json!({"user_id": "u-9"}));
}

#[rstest]
fn for_event_rejects_invalid_discriminators(now: DateTime<Utc>) {
    let result = OutboxMessage::for_event(&Nameless, "misc", now);
    assert_eq!(
        result.err(),
        Some(OutboxMessageError::EventType(EventTypeValidationError::Empty))
    );
}

#[rstest]
fn failures_increment_and_reschedule(mut message: OutboxMessage, now: DateTime<Utc>) {
    let retry_at = now + chrono::TimeDelta::seconds(30);
    let count = message.record_failure(&RetryFailure {
        reason: "503".to_owned(),
        next_attempt_at: retry_at,
    });

    assert_eq!(count, 1);
    assert_eq!(message.error.as_deref(), Some("503"));
    assert_eq!(message.next_attempt_at, retry_at);
    assert!(!message.is_processed());
}

#[rstest]
fn processed_messages_are_immutable(mut message: OutboxMessage, now: DateTime<Utc>) {
    assert!(message.record_success(now));
    let snapshot = message.clone();

    assert!(!message.record_success(now + chrono::TimeDelta::minutes(1)));
    let count = message.record_failure(&RetryFailure {
        reason: "late".to_owned(),
        next_attempt_at: now,
    });

    assert_eq!(count, 0);
    assert_eq!(message, snapshot);
}

#[rstest]
fn dead_letters_stop_being_claimable(mut message: OutboxMessage, now: DateTime<Utc>) {
    let lease = RelayLease::new("relay-a", now, Duration::from_secs(30));
    for _ in 0..3 {
        message.record_failure(&RetryFailure {
            reason: "down".to_owned(),
            next_attempt_at: now,
        });
    }

    assert!(message.is_dead_letter(3));
    assert!(!message.is_claimable(&lease, 3));
    assert!(message.is_claimable(&lease, 4));
}

#[rstest]
fn backoff_defers_claims(mut message: OutboxMessage, now: DateTime<Utc>) {
    message.record_failure(&RetryFailure {
        reason: "down".to_owned(),
        next_attempt_at: now + chrono::TimeDelta::seconds(10),
    });

    let early = RelayLease::new("relay-a", now, Duration::from_secs(30));
    let later = RelayLease::new(
        "relay-a",
        now + chrono::TimeDelta::seconds(10),
        Duration::from_secs(30),
    );
    assert!(!message.is_claimable(&early, 5));
    assert!(message.is_claimable(&later, 5));
}

#[rstest]
fn live_leases_exclude_other_relays(mut message: OutboxMessage, now: DateTime<Utc>) {
    let held = RelayLease::new("relay-a", now, Duration::from_secs(30));
    message.apply_lease(&held);

    let rival = RelayLease::new("relay-b", now, Duration::from_secs(30));
    let same_owner = RelayLease::new("relay-a", now, Duration::from_secs(30));
    let after_expiry = RelayLease::new(
        "relay-b",
        now + chrono::TimeDelta::seconds(31),
        Duration::from_secs(30),
    );

    assert!(!message.is_claimable(&rival, 5));
    assert!(message.is_claimable(&same_owner, 5));
    assert!(message.is_claimable(&after_expiry, 5));
}

#[rstest]
fn oversized_lease_durations_saturate(now: DateTime<Utc>) {
    let lease = RelayLease::new("relay-a", now, Duration::MAX);
    assert_eq!(lease.until, DateTime::<Utc>::MAX_UTC);
}
