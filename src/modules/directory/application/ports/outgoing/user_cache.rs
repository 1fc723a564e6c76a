use async_trait::async_trait;
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{User, UserLookup};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connection(String),

    #[error("Cache command failed: {0}")]
    Command(String),

    #[error("Cache payload could not be decoded: {0}")]
    Serialization(String),
}

/// Read-through / write-through cache of user payloads.
///
/// A user is stored once under its id; email, username and external id are
/// aliases pointing at that id. Evicting through any key drops the payload and
/// every alias it carries.
#[async_trait]
pub trait UserCache: Send + Sync {
    /// Writes the payload and all its aliases, refreshing their TTL.
    async fn put(&self, user: &User) -> Result<(), CacheError>;

    /// Returns the payload `lookup` resolves to. An alias whose payload no
    /// longer carries it is a miss.
    async fn get(&self, lookup: &UserLookup) -> Result<Option<User>, CacheError>;

    /// Evicts the user `lookup` resolves to, together with the addressed key.
    async fn evict(&self, lookup: &UserLookup) -> Result<(), CacheError>;

    /// Evicts a known payload's primary entry and aliases without resolving.
    async fn evict_user(&self, user: &User) -> Result<(), CacheError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, CacheError> {
        self.get(&UserLookup::Id(id)).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, CacheError> {
        self.get(&UserLookup::Email(email.to_string())).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, CacheError> {
        self.get(&UserLookup::Username(username.to_string())).await
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<User>, CacheError> {
        self.get(&UserLookup::ExternalId(external_id.to_string()))
            .await
    }

    async fn evict_by_id(&self, id: Uuid) -> Result<(), CacheError> {
        self.evict(&UserLookup::Id(id)).await
    }

    async fn evict_by_email(&self, email: &str) -> Result<(), CacheError> {
        self.evict(&UserLookup::Email(email.to_string())).await
    }
}
