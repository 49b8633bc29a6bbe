//! Sessions: scoped state, the event log, and pluggable storage.

pub mod persistence;
#[cfg(feature = "jsonl")]
pub mod persistence_jsonl;
#[cfg(feature = "postgres")]
pub mod persistence_postgres;
#[cfg(feature = "redis-backend")]
pub mod persistence_redis;
pub mod state;
pub mod types;

pub use persistence::{GetSessionConfig, MemorySessionStore, SessionStore};
#[cfg(feature = "jsonl")]
pub use persistence_jsonl::{JsonlConfig, JsonlConfigBuilder, JsonlSessionStore, SyncMode};
#[cfg(feature = "postgres")]
pub use persistence_postgres::{PostgresConfig, PostgresSessionStore};
#[cfg(feature = "redis-backend")]
pub use persistence_redis::{RedisConfig, RedisSessionStore};
pub use state::{
    APP_PREFIX, ScopedDelta, State, StateMap, StateScope, TEMP_PREFIX, USER_PREFIX, is_temp_key,
};
pub use types::{Session, SessionId, SessionSummary};

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Invalid identifier: {message}")]
    InvalidId { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Whether retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(any(feature = "postgres", feature = "redis-backend"))]
pub(crate) trait StorageResultExt<T> {
    fn storage_err(self) -> SessionResult<T>;
    fn storage_err_ctx(self, context: &str) -> SessionResult<T>;
}

/// Exponential backoff for transient storage failures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first; zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    #[cfg_attr(
        not(any(feature = "postgres", feature = "redis-backend")),
        allow(dead_code)
    )]
    pub(crate) async fn run<F, Fut, T>(
        &self,
        is_retryable: impl Fn(&SessionError) -> bool,
        operation: F,
    ) -> SessionResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = SessionResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if attempt >= self.max_retries || !is_retryable(&error) {
                return Err(error);
            }
            attempt += 1;
            let delay = self.delay(attempt).mul_f64(0.9 + rand::random::<f64>() * 0.2);
            tracing::warn!(attempt, ?delay, error = %error, "Retrying store operation");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(any(feature = "postgres", feature = "redis-backend"))]
impl<T, E: std::fmt::Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage_err(self) -> SessionResult<T> {
        self.map_err(|e| SessionError::Storage {
            message: e.to_string(),
        })
    }

    fn storage_err_ctx(self, context: &str) -> SessionResult<T> {
        self.map_err(|e| SessionError::Storage {
            message: format!("{}: {}", context, e),
        })
    }
}

/// Reject identifiers that cannot be used as a path component or key segment.
pub(crate) fn validate_id(kind: &str, id: &str) -> SessionResult<()> {
    if id.is_empty() {
        return Err(SessionError::InvalidId {
            message: format!("{kind} cannot be empty"),
        });
    }
    if id.contains(['/', '\\', ':', '\0']) || id.contains("..") {
        return Err(SessionError::InvalidId {
            message: format!("{kind} contains invalid characters: {id:?}"),
        });
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(SessionError::InvalidId {
            message: format!("{kind} contains control characters: {id:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_session_error_display() {
        let err = SessionError::NotFound {
            id: "test-123".to_string(),
        };
        assert!(err.to_string().contains("test-123"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(SessionError::Storage {
            message: "io".into()
        }
        .is_transient());
        assert!(!SessionError::AlreadyExists { id: "x".into() }.is_transient());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("session id", "abc-123_x.y").is_ok());
        assert!(validate_id("session id", "").is_err());
        assert!(validate_id("session id", "../etc").is_err());
        assert!(validate_id("session id", "a/b").is_err());
        assert!(validate_id("user id", "a\nb").is_err());
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_errors() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result: SessionResult<()> = policy
            .run(SessionError::is_transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SessionError::InvalidId {
                    message: "bad".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        calls.store(0, Ordering::SeqCst);
        let result = policy
            .run(SessionError::is_transient, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SessionError::Storage {
                        message: "busy".into(),
                    })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
