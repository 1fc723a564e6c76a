use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Pool};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{User, UserLookup};
use crate::modules::directory::application::ports::outgoing::user_cache::{
    CacheError, UserCache,
};

/// Redis-backed implementation of `UserCache`.
///
/// ## Redis data model
///
/// ```text
/// directory:user:id:{uuid}              -> JSON payload of the user
/// directory:user:email:{lowercased}     -> "{uuid}"
/// directory:user:username:{lowercased}  -> "{uuid}"
/// directory:user:external:{external_id} -> "{uuid}"
/// ```
///
/// Every key carries the same TTL and is written in one `MULTI/EXEC`. An alias
/// may outlive a change of the attribute it names; `get` treats such an alias
/// as a miss because the payload no longer answers to it.
#[derive(Clone)]
pub struct RedisUserCache {
    pool: Arc<Pool>,
    ttl: Duration,
}

impl RedisUserCache {
    pub fn new(pool: Arc<Pool>, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    fn primary_key(id: Uuid) -> String {
        format!("directory:user:id:{id}")
    }

    fn key_for(lookup: &UserLookup) -> String {
        match lookup {
            UserLookup::Id(id) => Self::primary_key(*id),
            UserLookup::Email(email) => {
                format!("directory:user:email:{}", email.trim().to_lowercase())
            }
            UserLookup::Username(username) => {
                format!("directory:user:username:{}", username.trim().to_lowercase())
            }
            UserLookup::ExternalId(external_id) => {
                format!("directory:user:external:{}", external_id.trim())
            }
        }
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    async fn get_conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(format!("Pool error: {}", e)))
    }

    /// Follows an alias to the id it points at. Unparseable aliases count as
    /// absent.
    async fn resolve_id(
        conn: &mut deadpool_redis::Connection,
        lookup: &UserLookup,
    ) -> Result<Option<Uuid>, CacheError> {
        if let UserLookup::Id(id) = lookup {
            return Ok(Some(*id));
        }

        let raw: Option<String> = conn
            .get(Self::key_for(lookup))
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        Ok(raw.and_then(|value| value.parse::<Uuid>().ok()))
    }

    async fn load_payload(
        conn: &mut deadpool_redis::Connection,
        id: Uuid,
    ) -> Result<Option<User>, CacheError> {
        let raw: Option<String> = conn
            .get(Self::primary_key(id))
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        raw.map(|payload| {
            serde_json::from_str::<User>(&payload)
                .map_err(|e| CacheError::Serialization(e.to_string()))
        })
        .transpose()
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    /// ```text
    /// MULTI
    /// SET directory:user:id:{uuid} {json} EX ttl
    /// SET directory:user:<alias>:{value} {uuid} EX ttl   (per alias)
    /// EXEC
    /// ```
    async fn put(&self, user: &User) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(user).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let ttl = self.ttl_secs();
        let id = user.id.to_string();

        let mut conn = self.get_conn().await?;

        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic();
        pipe.set_ex(Self::primary_key(user.id), payload, ttl).ignore();

        for lookup in user.lookup_keys() {
            if matches!(lookup, UserLookup::Id(_)) {
                continue;
            }
            pipe.set_ex(Self::key_for(&lookup), &id, ttl).ignore();
        }

        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, lookup: &UserLookup) -> Result<Option<User>, CacheError> {
        let mut conn = self.get_conn().await?;

        let Some(id) = Self::resolve_id(&mut conn, lookup).await? else {
            return Ok(None);
        };

        let user = Self::load_payload(&mut conn, id).await?;

        Ok(user.filter(|u| u.answers_to(lookup)))
    }

    /// Drops the addressed key, the payload it resolves to, and every alias
    /// that payload carries. Missing keys are not an error.
    async fn evict(&self, lookup: &UserLookup) -> Result<(), CacheError> {
        let mut conn = self.get_conn().await?;

        let mut keys = vec![Self::key_for(lookup)];

        if let Some(id) = Self::resolve_id(&mut conn, lookup).await? {
            keys.push(Self::primary_key(id));

            // A payload that no longer decodes is still dropped by its primary key.
            match Self::load_payload(&mut conn, id).await {
                Ok(Some(user)) => keys.extend(user.lookup_keys().iter().map(Self::key_for)),
                Ok(None) => {}
                Err(e) => debug!(user_id = %id, error = %e, "evicting undecodable payload"),
            }
        }

        keys.sort();
        keys.dedup();

        let _: () = conn
            .del(keys)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        Ok(())
    }

    async fn evict_user(&self, user: &User) -> Result<(), CacheError> {
        let keys: Vec<String> = user.lookup_keys().iter().map(Self::key_for).collect();

        let mut conn = self.get_conn().await?;

        let _: () = conn
            .del(keys)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        Ok(())
    }
}
