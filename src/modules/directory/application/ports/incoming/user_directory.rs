use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{
    LookupContext, NewUser, PageRequest, PageResult, SessionMetadata, SessionRecord, User,
    UserListFilter, UserLookup, UserPatch, UserSort,
};
use crate::modules::directory::application::domain::validation::ValidationError;

//
// ──────────────────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────────────────
//

/// Backend a directory operation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    UserStore,
    UserCache,
    SessionStore,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::UserStore => "user store",
            Backend::UserCache => "user cache",
            Backend::SessionStore => "session store",
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DirectoryError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{field} is already in use: {value}")]
    AlreadyExists { field: &'static str, value: String },

    #[error("Cannot {operation} a user in state {current_state}")]
    InvalidState {
        operation: &'static str,
        current_state: String,
    },

    #[error("{backend} is unavailable")]
    Unavailable { backend: Backend },

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

impl DirectoryError {
    pub fn user_not_found(lookup: &UserLookup) -> Self {
        DirectoryError::NotFound {
            entity: "user",
            key: lookup.to_string(),
        }
    }

    pub fn session_not_found() -> Self {
        // The session id is a credential and never goes into an error.
        DirectoryError::NotFound {
            entity: "session",
            key: "<redacted>".to_string(),
        }
    }

    pub fn unavailable(backend: Backend) -> Self {
        DirectoryError::Unavailable { backend }
    }
}

impl From<ValidationError> for DirectoryError {
    fn from(err: ValidationError) -> Self {
        DirectoryError::Validation {
            field: err.field,
            reason: err.reason,
        }
    }
}

/// A session together with the account it currently resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    pub session: SessionRecord,
    pub user: User,
}

//
// ──────────────────────────────────────────────────────────
// Incoming Port
// ──────────────────────────────────────────────────────────
//

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, DirectoryError>;

    /// `Sensitive` lookups always return the store's current row.
    async fn get_user(
        &self,
        lookup: UserLookup,
        context: LookupContext,
    ) -> Result<User, DirectoryError>;

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> Result<User, DirectoryError>;

    /// A second delete of the same user reports `NotFound`.
    async fn delete_user(&self, id: Uuid) -> Result<(), DirectoryError>;

    async fn restore_user(&self, id: Uuid) -> Result<User, DirectoryError>;

    async fn list_users(
        &self,
        filter: UserListFilter,
        page: PageRequest,
        sort: UserSort,
    ) -> Result<PageResult<User>, DirectoryError>;

    async fn open_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> Result<(), DirectoryError>;

    async fn resolve_session(&self, session_id: &str) -> Result<ResolvedSession, DirectoryError>;

    async fn revoke_session(&self, session_id: &str) -> Result<(), DirectoryError>;

    async fn record_login(&self, id: Uuid) -> Result<User, DirectoryError>;

    async fn get_by_id(&self, id: Uuid) -> Result<User, DirectoryError> {
        self.get_user(UserLookup::Id(id), LookupContext::Standard)
            .await
    }

    async fn get_by_email(&self, email: &str) -> Result<User, DirectoryError> {
        self.get_user(UserLookup::Email(email.to_string()), LookupContext::Standard)
            .await
    }

    async fn get_by_username(&self, username: &str) -> Result<User, DirectoryError> {
        self.get_user(
            UserLookup::Username(username.to_string()),
            LookupContext::Standard,
        )
        .await
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<User, DirectoryError> {
        self.get_user(
            UserLookup::ExternalId(external_id.to_string()),
            LookupContext::Standard,
        )
        .await
    }
}
