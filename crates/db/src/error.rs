//! Storage-layer error type.
//!
//! Backends map their native failures onto [`StoreError`] so the engine can
//! tell a retryable conflict from an outage without knowing which backend
//! it is talking to.

use leadroute_core::error::CoreError;
use leadroute_core::types::DbId;

/// PostgreSQL SQLSTATE for serialization failures.
const SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL SQLSTATE for a detected deadlock.
const DEADLOCK_DETECTED: &str = "40P01";

/// PostgreSQL SQLSTATE for a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// Another writer changed the guarded state first. Safe to retry.
    #[error("Concurrent update conflict: {0}")]
    ConcurrentUpdateConflict(String),

    /// The write would break a uniqueness rule (e.g. a user twice in one pool).
    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored row could not be turned back into a domain value.
    #[error("Invalid stored data: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &'static str, id: DbId) -> Self {
        StoreError::NotFound { entity, id }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        StoreError::ConcurrentUpdateConflict(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrentUpdateConflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::StorageUnavailable(err.to_string())
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    StoreError::ConcurrentUpdateConflict(db_err.message().to_string())
                }
                Some(UNIQUE_VIOLATION) => StoreError::Duplicate(db_err.message().to_string()),
                _ => StoreError::Database(err),
            },
            _ => StoreError::Database(err),
        }
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            CoreError::Conflict(msg) => StoreError::ConcurrentUpdateConflict(msg),
            CoreError::Validation(msg) | CoreError::Internal(msg) => StoreError::Invalid(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn pool_timeout_is_unavailable() {
        assert_matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::StorageUnavailable(_)
        );
    }

    #[test]
    fn row_not_found_stays_a_database_error() {
        assert_matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        );
    }

    #[test]
    fn core_conflict_maps_to_retryable_conflict() {
        let err = StoreError::from(CoreError::Conflict("moved".to_string()));
        assert!(err.is_conflict());
    }
}
