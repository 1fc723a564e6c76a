use async_trait::async_trait;
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{SessionMetadata, SessionRecord};

/// Errors that can occur in session registry operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionStoreError {
    #[error("Session backend error: {0}")]
    Backend(String),

    #[error("Session already expired")]
    AlreadyExpired,

    #[error("Session payload could not be decoded: {0}")]
    Serialization(String),
}

/// Revocable mapping from an opaque credential identifier to a user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Records a session; it disappears on its own at `metadata.expires_at`.
    async fn put(
        &self,
        session_id: &str,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> Result<(), SessionStoreError>;

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionStoreError>;

    /// Removing an unknown session succeeds.
    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError>;

    /// Best-effort bulk revocation. A session recorded concurrently with this
    /// call may survive it.
    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, SessionStoreError>;
}
