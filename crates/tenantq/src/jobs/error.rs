use thiserror::Error;

/// Caller-facing failure kinds for the queue engine. The HTTP layer maps
/// these onto status codes; the worker uses `is_transient` to decide
/// whether a store failure is worth retrying in place.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found")]
    NotFound,

    #[error("a job with this idempotency key already exists for this tenant")]
    DuplicateIdempotency,

    #[error("concurrent job quota exceeded: {running} running, limit {limit}")]
    QuotaExceeded { running: i64, limit: i64 },

    #[error("rate limit exceeded: {limit_per_minute} submissions per minute")]
    RateLimited { limit_per_minute: i32 },

    #[error("invalid job state transition: {0}")]
    InvalidState(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl QueueError {
    /// Deadlocks, serialization failures and connection-level hiccups are
    /// safe to retry with backoff; everything else is not.
    pub fn is_transient(&self) -> bool {
        let QueueError::Store(err) = self else {
            return false;
        };
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
