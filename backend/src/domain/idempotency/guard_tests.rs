//! Tests for the idempotency guard: replay, key validation, caching policy,
//! expiry, and claim mode.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mockable::Clock;
use rstest::{fixture, rstest};
use serde::Serialize;
use serde_json::{Value, json};

use super::*;
use crate::domain::dispatch::{ExecutionScope, Handler, HandlerRegistry, RequestKind};
use crate::domain::ports::{IdempotencyCache, MockIdempotencyCache};
use crate::outbound::memory::InMemoryIdempotencyCache;
use crate::test_support::MutableClock;

const K1: &str = "6f1c1f0e-6b7a-4c1e-9a57-2f0d3c9a1b11";
const K2: &str = "0b8e7c62-34d5-4f0e-8c11-5d3a2e7f9c20";

struct Fixture {
    clock: Arc<MutableClock>,
    cache: Arc<InMemoryIdempotencyCache>,
}

impl Fixture {
    fn guard(&self, config: IdempotencyConfig) -> IdempotencyGuard<InMemoryIdempotencyCache> {
        IdempotencyGuard::new(self.cache.clone(), self.clock.clone(), config, "orders")
    }
}

#[fixture]
fn fixture() -> Fixture {
    let clock = Arc::new(MutableClock::new(
        Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0)
            .single()
            .expect("valid timestamp"),
    ));
    let cache = Arc::new(InMemoryIdempotencyCache::new(clock.clone()));
    Fixture { clock, cache }
}

fn claim_config() -> IdempotencyConfig {
    IdempotencyConfig::default()
        .with_claim_mode(ClaimMode::ClaimBeforeExecute)
        .with_claim_polling(10, Duration::from_millis(20))
}

async fn created(calls: &AtomicUsize, id: &str) -> Result<GuardedResponse, Error> {
    calls.fetch_add(1, Ordering::SeqCst);
    Ok(GuardedResponse::created(json!({ "id": id })))
}

#[rstest]
#[tokio::test]
async fn second_request_replays_without_executing(fixture: Fixture) {
    let guard = fixture.guard(IdempotencyConfig::default());
    let calls = AtomicUsize::new(0);
    let body = json!({"item": "book"});

    let first = guard
        .execute(Some(K1), &body, || created(&calls, "abc"))
        .await
        .expect("first call");
    let second = guard
        .execute(Some(K1), &body, || created(&calls, "other"))
        .await
        .expect("second call");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.status, first.status);
    assert_eq!(second.body, first.body);
}

#[rstest]
#[tokio::test]
async fn replay_ignores_a_different_request_body(fixture: Fixture) {
    let guard = fixture.guard(IdempotencyConfig::default());
    let calls = AtomicUsize::new(0);

    guard
        .execute(Some(K1), &json!({"item": "book"}), || created(&calls, "abc"))
        .await
        .expect("first call");
    let replay = guard
        .execute(Some(K1), &json!({"item": "lamp"}), || created(&calls, "xyz"))
        .await
        .expect("replay");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(replay.status, ResponseStatus::CREATED);
    assert_eq!(replay.body, json!({"id": "abc"}));
}

#[rstest]
#[case(None, IdempotencyKeyValidationError::Missing)]
#[case(Some(""), IdempotencyKeyValidationError::Empty)]
#[case(Some("order-17"), IdempotencyKeyValidationError::Invalid)]
#[tokio::test]
async fn bad_keys_are_rejected_before_execution(
    fixture: Fixture,
    #[case] raw: Option<&str>,
    #[case] expected: IdempotencyKeyValidationError,
) {
    let guard = fixture.guard(IdempotencyConfig::default());
    let calls = AtomicUsize::new(0);

    let err = guard
        .execute(raw, &json!({}), || created(&calls, "abc"))
        .await
        .expect_err("key rejected");

    assert_eq!(err, IdempotencyError::BadIdempotencyKey(expected));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(fixture.cache.is_empty());
    assert_eq!(err.into_domain_error().code(), crate::domain::ErrorCode::InvalidRequest);
}

#[rstest]
#[tokio::test]
async fn distinct_keys_do_not_interfere(fixture: Fixture) {
    let guard = fixture.guard(IdempotencyConfig::default());
    let calls = AtomicUsize::new(0);

    let a = guard
        .execute(Some(K1), &json!({}), || created(&calls, "a"))
        .await
        .expect("k1");
    let b = guard
        .execute(Some(K2), &json!({}), || created(&calls, "b"))
        .await
        .expect("k2");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_ne!(a.body, b.body);
}

#[rstest]
#[tokio::test]
async fn non_success_responses_are_not_cached(fixture: Fixture) {
    let guard = fixture.guard(IdempotencyConfig::default());
    let calls = AtomicUsize::new(0);
    let counter = &calls;
    let conflict = move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(GuardedResponse::new(
            ResponseStatus::new(409),
            json!({"reason": "stock"}),
        ))
    };

    let first = guard.execute(Some(K1), &json!({}), conflict).await.expect("first");
    let second = guard.execute(Some(K1), &json!({}), conflict).await.expect("second");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!first.replayed && !second.replayed);
}

#[rstest]
#[tokio::test]
async fn failures_are_returned_unmodified_and_not_cached(fixture: Fixture) {
    let guard = fixture.guard(IdempotencyConfig::default());
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    let err = guard
        .execute(Some(K1), &json!({}), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::service_unavailable("payments offline"))
        })
        .await
        .expect_err("operation fails");
    assert_eq!(
        err,
        IdempotencyError::Operation(Error::service_unavailable("payments offline"))
    );

    let retried = guard
        .execute(Some(K1), &json!({}), || created(&calls, "abc"))
        .await
        .expect("retry executes");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!retried.replayed);
}

#[rstest]
#[tokio::test]
async fn expired_records_execute_again(fixture: Fixture) {
    let guard = fixture.guard(IdempotencyConfig::with_ttl(Duration::from_secs(60)));
    let calls = AtomicUsize::new(0);

    guard
        .execute(Some(K1), &json!({}), || created(&calls, "first"))
        .await
        .expect("first");
    fixture.clock.advance(Duration::from_secs(59));
    let cached = guard
        .execute(Some(K1), &json!({}), || created(&calls, "second"))
        .await
        .expect("cached");
    fixture.clock.advance(Duration::from_secs(1));
    let fresh = guard
        .execute(Some(K1), &json!({}), || created(&calls, "third"))
        .await
        .expect("expired");

    assert!(cached.replayed);
    assert!(!fresh.replayed);
    assert_eq!(fresh.body, json!({"id": "third"}));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[tokio::test]
async fn cache_read_failures_stop_execution() {
    let mut cache = MockIdempotencyCache::new();
    cache
        .expect_get()
        .return_once(|_| Err(IdempotencyCacheError::backend("connection refused")));
    let guard = IdempotencyGuard::new(
        Arc::new(cache),
        Arc::new(MutableClock::new(Utc::now())),
        IdempotencyConfig::default(),
        "orders",
    );
    let calls = AtomicUsize::new(0);

    let err = guard
        .execute(Some(K1), &json!({}), || created(&calls, "abc"))
        .await
        .expect_err("cache down");

    assert_eq!(
        err,
        IdempotencyError::Cache(IdempotencyCacheError::backend("connection refused"))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn cache_write_failures_still_return_the_committed_response() {
    let mut cache = MockIdempotencyCache::new();
    cache.expect_get().times(1).return_once(|_| Ok(None));
    cache
        .expect_set()
        .withf(|_, entry, _| matches!(entry, CacheEntry::Completed(_)))
        .times(1)
        .return_once(|_, _, _| Err(IdempotencyCacheError::backend("read-only replica")));
    let guard = IdempotencyGuard::new(
        Arc::new(cache),
        Arc::new(MutableClock::new(Utc::now())),
        IdempotencyConfig::default(),
        "orders",
    );
    let calls = AtomicUsize::new(0);

    let response = guard
        .execute(Some(K1), &json!({}), || created(&calls, "abc"))
        .await
        .expect("the operation committed");

    assert_eq!(response.status, ResponseStatus::CREATED);
    assert_eq!(response.body, json!({"id": "abc"}));
    assert!(!response.replayed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn claim_mode_frees_the_key_when_the_response_cannot_be_cached() {
    let mut cache = MockIdempotencyCache::new();
    cache.expect_get().times(1).return_once(|_| Ok(None));
    cache
        .expect_set_if_absent()
        .times(1)
        .return_once(|_, _, _| Ok(true));
    cache
        .expect_set()
        .times(1)
        .return_once(|_, _, _| Err(IdempotencyCacheError::backend("read-only replica")));
    cache
        .expect_remove_if_unchanged()
        .withf(|key, entry| {
            *key == format!("orders:{K1}") && matches!(entry, CacheEntry::Pending { .. })
        })
        .times(1)
        .return_once(|_, _| Ok(true));
    let guard = IdempotencyGuard::new(
        Arc::new(cache),
        Arc::new(MutableClock::new(Utc::now())),
        claim_config(),
        "orders",
    );
    let calls = AtomicUsize::new(0);

    let response = guard
        .execute(Some(K1), &json!({}), || created(&calls, "abc"))
        .await
        .expect("the operation committed");

    assert!(!response.replayed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn claim_mode_runs_concurrent_duplicates_once(fixture: Fixture) {
    let guard = fixture.guard(claim_config());
    let calls = AtomicUsize::new(0);
    let counter = &calls;
    let slow = move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(GuardedResponse::created(json!({"id": "abc"})))
    };

    let body = json!({});

    let (first, second) = tokio::join!(
        guard.execute(Some(K1), &body, slow),
        guard.execute(Some(K1), &body, slow),
    );

    let first = first.expect("first");
    let second = second.expect("second");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.body, second.body);
    assert!(first.replayed != second.replayed);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn claim_mode_reports_in_progress_when_the_holder_is_slow(fixture: Fixture) {
    let guard = fixture.guard(claim_config().with_claim_polling(2, Duration::from_millis(10)));
    fixture
        .cache
        .set(
            &format!("orders:{K1}"),
            &CacheEntry::claim(fixture.clock.utc()),
            Duration::from_secs(30),
        )
        .await
        .expect("seed claim");
    let calls = AtomicUsize::new(0);

    let err = guard
        .execute(Some(K1), &json!({}), || created(&calls, "abc"))
        .await
        .expect_err("still in progress");

    assert_eq!(
        err,
        IdempotencyError::InProgress {
            key: K1.to_owned()
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn claim_mode_releases_the_key_after_failure(fixture: Fixture) {
    let guard = fixture.guard(claim_config());
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    guard
        .execute(Some(K1), &json!({}), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::internal("boom"))
        })
        .await
        .expect_err("fails");
    let retried = guard
        .execute(Some(K1), &json!({}), || created(&calls, "abc"))
        .await
        .expect("retry executes");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!retried.replayed);
}

#[rstest]
#[tokio::test]
async fn claim_mode_ignores_stale_claims(fixture: Fixture) {
    let guard = fixture.guard(claim_config().with_claim_ttl(Duration::from_secs(5)));
    fixture
        .cache
        .set(
            &format!("orders:{K1}"),
            &CacheEntry::claim(fixture.clock.utc()),
            Duration::from_secs(3600),
        )
        .await
        .expect("seed claim");
    fixture.clock.advance(Duration::from_secs(6));
    let calls = AtomicUsize::new(0);

    let response = guard
        .execute(Some(K1), &json!({}), || created(&calls, "abc"))
        .await
        .expect("stale claim replaced");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!response.replayed);
}

/// Cache whose reads return what was stored when the read started, after a
/// scripted delay.
struct LaggingCache {
    inner: InMemoryIdempotencyCache,
    read_delays: Mutex<VecDeque<Duration>>,
}

impl LaggingCache {
    fn new(inner: InMemoryIdempotencyCache, delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            inner,
            read_delays: Mutex::new(delays.into_iter().collect()),
        }
    }
}

#[async_trait]
impl IdempotencyCache for LaggingCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, IdempotencyCacheError> {
        let entry = self.inner.get(key).await;
        let delay = self
            .read_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        entry
    }

    async fn set(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<(), IdempotencyCacheError> {
        self.inner.set(key, entry, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        self.inner.set_if_absent(key, entry, ttl).await
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        self.inner.replace_if_unchanged(key, expected, entry, ttl).await
    }

    async fn remove_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
    ) -> Result<bool, IdempotencyCacheError> {
        self.inner.remove_if_unchanged(key, expected).await
    }

    async fn remove(&self, key: &str) -> Result<(), IdempotencyCacheError> {
        self.inner.remove(key).await
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn claim_mode_runs_once_when_duplicates_race_over_a_stale_claim(fixture: Fixture) {
    let inner = InMemoryIdempotencyCache::new(fixture.clock.clone());
    inner
        .set(
            &format!("orders:{K1}"),
            &CacheEntry::claim(fixture.clock.utc()),
            Duration::from_secs(3600),
        )
        .await
        .expect("seed claim");
    fixture.clock.advance(Duration::from_secs(60));
    let cache = Arc::new(LaggingCache::new(
        inner,
        [Duration::from_millis(10), Duration::from_millis(50)],
    ));
    let guard = IdempotencyGuard::new(cache, fixture.clock.clone(), claim_config(), "orders");
    let calls = AtomicUsize::new(0);
    let counter = &calls;
    let slow = move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(GuardedResponse::created(json!({"id": "abc"})))
    };
    let body = json!({});

    let (first, second) = tokio::join!(
        guard.execute(Some(K1), &body, slow),
        guard.execute(Some(K1), &body, slow),
    );

    let first = first.expect("first");
    let second = second.expect("second");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.body, second.body);
    assert!(first.replayed != second.replayed);
}

#[rstest]
#[tokio::test]
async fn releasing_a_claim_leaves_a_newer_claim_in_place(fixture: Fixture) {
    let guard = fixture.guard(claim_config().with_claim_ttl(Duration::from_secs(5)));
    let cache_key = format!("orders:{K1}");
    let newer = CacheEntry::claim(fixture.clock.utc());
    let cache = Arc::clone(&fixture.cache);
    let displaced = newer.clone();

    let err = guard
        .execute(Some(K1), &json!({}), move || async move {
            cache
                .set(&cache_key, &displaced, Duration::from_secs(5))
                .await
                .expect("displace claim");
            Err(Error::internal("boom"))
        })
        .await
        .expect_err("fails");

    assert!(matches!(err, IdempotencyError::Operation(_)));
    assert_eq!(
        fixture
            .cache
            .get(&format!("orders:{K1}"))
            .await
            .expect("get"),
        Some(newer)
    );
}

#[derive(Debug, Serialize)]
struct PlaceOrder {
    sku: String,
}

impl crate::domain::dispatch::Request for PlaceOrder {
    type Response = Value;
    const KIND: RequestKind = RequestKind::Command;
}

impl IdempotentCommand for PlaceOrder {
    const SUCCESS_STATUS: ResponseStatus = ResponseStatus::CREATED;
}

struct PlaceOrderHandler(Arc<AtomicUsize>);

#[async_trait]
impl Handler<PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, request: PlaceOrder, _scope: &ExecutionScope) -> Result<Value, Error> {
        let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "orderId": format!("o-{n}"), "sku": request.sku }))
    }
}

#[rstest]
#[tokio::test]
async fn guarded_dispatch_runs_the_handler_once(fixture: Fixture) {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::builder()
        .register::<PlaceOrder, _>(PlaceOrderHandler(Arc::clone(&calls)))
        .build()
        .expect("registry");
    let dispatcher = Dispatcher::new(registry);
    let guard = fixture.guard(IdempotencyConfig::default());

    let first = guard
        .dispatch(&dispatcher, Some(K1), PlaceOrder { sku: "A1".into() })
        .await
        .expect("first");
    let second = guard
        .dispatch(&dispatcher, Some(K1), PlaceOrder { sku: "A1".into() })
        .await
        .expect("second");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.status, ResponseStatus::CREATED);
    assert_eq!(second.body, json!({"orderId": "o-1", "sku": "A1"}));
    assert!(second.replayed);
}

#[rstest]
#[tokio::test]
async fn guarded_dispatch_surfaces_missing_handlers(fixture: Fixture) {
    let dispatcher = Dispatcher::new(HandlerRegistry::builder().build().expect("registry"));
    let guard = fixture.guard(IdempotencyConfig::default());

    let err = guard
        .dispatch(&dispatcher, Some(K1), PlaceOrder { sku: "A1".into() })
        .await
        .expect_err("no handler");

    assert!(matches!(err, IdempotencyError::Operation(ref e) if e.code() == crate::domain::ErrorCode::InternalError));
    assert!(fixture.cache.is_empty());
}
