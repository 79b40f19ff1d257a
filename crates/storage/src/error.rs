use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a failed store call, classified so callers can decide whether
/// to retry without inspecting driver-specific errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Concurrent modification, lock contention or a uniqueness clash.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The database could not be reached in time; nothing was written.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Io(io) => StoreError::Unavailable(io.to_string()),
            sqlx::Error::Database(db) => {
                let contended = db.code().as_deref().is_some_and(is_lock_contention);
                if contended
                    || db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation()
                {
                    StoreError::Conflict(db.message().to_string())
                } else {
                    StoreError::Internal(anyhow::Error::new(sqlx::Error::Database(db)))
                }
            }
            other => StoreError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Internal(anyhow::Error::new(err).context("malformed json column"))
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes
/// such as SQLITE_BUSY_SNAPSHOT (517).
fn is_lock_contention(code: &str) -> bool {
    code.parse::<i32>()
        .map(|extended| matches!(extended & 0xff, 5 | 6))
        .unwrap_or(false)
}
