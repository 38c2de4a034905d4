//! Diesel and pool error mapping for the outbox adapters.

use tracing::debug;

use crate::domain::ports::OutboxStoreError;

use super::pool::PoolError;

/// Map pool errors to outbox connection errors.
pub(crate) fn map_pool_error(error: PoolError) -> OutboxStoreError {
    match error {
        PoolError::Config { message }
        | PoolError::Checkout { message }
        | PoolError::Build { message } => OutboxStoreError::connection(message),
    }
}

/// Map Diesel errors to outbox store errors.
///
/// Details are logged at debug level; the returned message stays generic so
/// SQL text does not leak into relay logs at higher levels.
pub(crate) fn map_diesel_error(error: diesel::result::Error) -> OutboxStoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::NotFound => OutboxStoreError::query("record not found"),
        DieselError::QueryBuilderError(_) => OutboxStoreError::query("database query error"),
        DieselError::DeserializationError(err) => {
            OutboxStoreError::serialization(format!("row decoding failed: {err}"))
        }
        DieselError::DatabaseError(kind, _) => match kind {
            DatabaseErrorKind::UniqueViolation => {
                OutboxStoreError::query("duplicate outbox message id")
            }
            DatabaseErrorKind::ClosedConnection => {
                OutboxStoreError::connection("database connection error")
            }
            DatabaseErrorKind::SerializationFailure => {
                OutboxStoreError::query("transaction serialization failure")
            }
            _ => OutboxStoreError::query("database error"),
        },
        _ => OutboxStoreError::query("database error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::{DatabaseErrorKind, Error as DieselError};
    use rstest::rstest;

    #[rstest]
    fn pool_errors_map_to_connection_errors() {
        let err = map_pool_error(PoolError::checkout("connection refused"));

        assert!(matches!(err, OutboxStoreError::Connection { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[rstest]
    fn not_found_maps_to_query_error() {
        let err = map_diesel_error(DieselError::NotFound);

        assert!(matches!(err, OutboxStoreError::Query { .. }));
        assert!(err.to_string().contains("record not found"));
    }

    #[rstest]
    #[case(DatabaseErrorKind::UniqueViolation, "query")]
    #[case(DatabaseErrorKind::ClosedConnection, "connection")]
    #[case(DatabaseErrorKind::SerializationFailure, "query")]
    fn database_errors_map_by_kind(#[case] kind: DatabaseErrorKind, #[case] expected: &str) {
        let err = map_diesel_error(DieselError::DatabaseError(
            kind,
            Box::new(String::from("boom")),
        ));

        assert_eq!(err.kind(), expected);
    }
}
