//! `SKIP_TEST_CLUSTER` policy for suites that need a running PostgreSQL.

/// True when `SKIP_TEST_CLUSTER` is "1", "true" or "yes" in any case.
pub fn should_skip_test_cluster() -> bool {
    std::env::var("SKIP_TEST_CLUSTER")
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Skip the calling test when the cluster is optional, fail it otherwise.
///
/// Returns `None` after printing a skip marker when `SKIP_TEST_CLUSTER` is
/// set; panics with `reason` when it is not, so CI never passes silently
/// without a database.
pub fn handle_cluster_setup_failure<T>(reason: impl std::fmt::Display) -> Option<T> {
    if should_skip_test_cluster() {
        eprintln!("SKIP-TEST-CLUSTER: {reason}");
        None
    } else {
        panic!("embedded PostgreSQL unavailable: {reason}. Set SKIP_TEST_CLUSTER=1 to skip.");
    }
}
