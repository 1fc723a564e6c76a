use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{
    NewUser, PageRequest, PageResult, User, UserListFilter, UserSort, UserStatus,
};

/// Column protected by a uniqueness index among live rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
    ExternalId,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Email => "email",
            UniqueField::Username => "username",
            UniqueField::ExternalId => "external_id",
        }
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    All,
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SoftDeleteOutcome {
    Deleted(User),
    AlreadyDeleted(User),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UserStoreError {
    #[error("User not found")]
    UserNotFound,

    #[error("A live user already uses this {0}")]
    AlreadyExists(UniqueField),

    #[error("User is not deleted (status: {0})")]
    NotDeleted(UserStatus),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database call timed out")]
    Timeout,
}

/// Authoritative storage of user rows.
///
/// Lookups return soft-deleted rows as well; visibility is the caller's call.
/// The `exists_*` probes only consider live rows, matching the uniqueness rules.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError>;
    async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError>;
    async fn get_by_external_id(&self, external_id: &str)
        -> Result<Option<User>, UserStoreError>;

    async fn list(
        &self,
        scope: ListScope,
        filter: UserListFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<PageResult<User>, UserStoreError>;

    async fn list_all(
        &self,
        filter: UserListFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<PageResult<User>, UserStoreError> {
        self.list(ListScope::All, filter, sort, page).await
    }

    async fn list_active(
        &self,
        filter: UserListFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<PageResult<User>, UserStoreError> {
        self.list(ListScope::Active, filter, sort, page).await
    }

    async fn list_deleted(
        &self,
        filter: UserListFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<PageResult<User>, UserStoreError> {
        self.list(ListScope::Deleted, filter, sort, page).await
    }

    /// Inserts a new row with a fresh id.
    async fn add(&self, user: NewUser) -> Result<User, UserStoreError>;

    /// Persists an already merged row. `id` and `created_at` are never written.
    async fn update(&self, user: User) -> Result<User, UserStoreError>;

    async fn soft_delete(&self, id: Uuid) -> Result<SoftDeleteOutcome, UserStoreError>;

    async fn restore(&self, id: Uuid) -> Result<User, UserStoreError>;

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, UserStoreError>;

    async fn exists_by_id(&self, id: Uuid) -> Result<bool, UserStoreError>;
    async fn exists_by_email(&self, email: &str) -> Result<bool, UserStoreError>;
    async fn exists_by_username(&self, username: &str) -> Result<bool, UserStoreError>;
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, UserStoreError>;
}
