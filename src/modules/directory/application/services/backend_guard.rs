use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::modules::directory::application::ports::incoming::user_directory::{
    Backend, DirectoryError,
};
use crate::modules::directory::application::ports::outgoing::user_store::UserStoreError;

/// Upper bound on a single call to each backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    pub store: Duration,
    pub cache: Duration,
    pub sessions: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_millis(2000),
            cache: Duration::from_millis(250),
            sessions: Duration::from_millis(250),
        }
    }
}

/// Runs a store call under `limit`; an elapsed deadline becomes
/// `UserStoreError::Timeout`.
pub async fn guard_store<T, F>(limit: Duration, call: F) -> Result<T, UserStoreError>
where
    F: Future<Output = Result<T, UserStoreError>>,
{
    timeout(limit, call)
        .await
        .unwrap_or(Err(UserStoreError::Timeout))
}

/// Runs a cache or session call whose failure must not fail the caller.
/// Errors and timeouts are logged and collapse to `None`.
pub async fn best_effort<T, E, F>(
    backend: Backend,
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Option<T>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(%backend, operation, error = %e, "backend call failed; continuing without it");
            None
        }
        Err(_) => {
            warn!(
                %backend,
                operation,
                timeout_ms = limit.as_millis() as u64,
                "backend call timed out; continuing without it"
            );
            None
        }
    }
}

/// Runs a call the operation cannot complete without. Errors and timeouts
/// surface as `DirectoryError::Unavailable`.
pub async fn guard_required<T, E, F>(
    backend: Backend,
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, DirectoryError>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(%backend, operation, error = %e, "required backend call failed");
            Err(DirectoryError::unavailable(backend))
        }
        Err(_) => {
            warn!(
                %backend,
                operation,
                timeout_ms = limit.as_millis() as u64,
                "required backend call timed out"
            );
            Err(DirectoryError::unavailable(backend))
        }
    }
}
