use std::time::Duration;

use shared::error::{ApiError, ErrorCode};
use storage::{Storage, StoreError};
use tracing::error;

pub mod accounts;
pub mod catalog;
pub mod ledger;
pub mod reservations;

pub use reservations::{cancel_reservation, create_reservation, list_reservations_for_user};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub policy: ReservationPolicy,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            policy: ReservationPolicy::default(),
        }
    }
}

/// How often a reservation transaction is re-run after a retryable failure.
#[derive(Debug, Clone, Copy)]
pub struct ReservationPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; later attempts wait proportionally longer.
    pub backoff: Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(20),
        }
    }
}

pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
        StoreError::Conflict(message) => ApiError::conflict(message),
        StoreError::Unavailable(message) => ApiError::new(ErrorCode::Unavailable, message),
        StoreError::Internal(err) => internal(err),
    }
}

/// Rewords a uniqueness clash reported by the store; other failures map as usual.
pub(crate) fn unique_violation(err: StoreError, message: impl FnOnce() -> String) -> ApiError {
    match err {
        StoreError::Conflict(detail) if detail.contains("UNIQUE") => ApiError::conflict(message()),
        other => store_error(other),
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = ?err, "internal store failure");
    ApiError::internal(err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
