use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{redis::AsyncCommands, Pool};
use std::sync::Arc;
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{SessionMetadata, SessionRecord};
use crate::modules::directory::application::ports::outgoing::session_store::{
    SessionStore, SessionStoreError,
};

use super::security::hash_session_id;

/// Redis-backed implementation of `SessionStore`.
///
/// ## Redis data model
///
/// 1. **Per-session key (authoritative)**
/// ```text
/// directory:session:{sha256(session_id)} -> JSON SessionRecord
/// ```
/// - TTL = time left until `expires_at`
///
/// 2. **Per-user index (helper for bulk revoke)**
/// ```text
/// directory:session:user:{user_id} -> SET(sha256(session_id))
/// ```
/// - TTL = the longest TTL of any session recorded in it
///
/// Raw session identifiers are never written; only their SHA-256 digest.
#[derive(Clone)]
pub struct RedisSessionStore {
    pool: Arc<Pool>,
}

impl RedisSessionStore {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    fn session_key(session_hash: &str) -> String {
        format!("directory:session:{session_hash}")
    }

    fn user_key(user_id: Uuid) -> String {
        format!("directory:session:user:{user_id}")
    }

    async fn get_conn(&self) -> Result<deadpool_redis::Connection, SessionStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| SessionStoreError::Backend(format!("Pool error: {}", e)))
    }
}

/// TTL to put on the user index so it outlives every session it lists.
/// `current` follows Redis `TTL` semantics: -2 missing, -1 no expiry.
fn index_ttl(current: i64, session_ttl: i64) -> i64 {
    if current > session_ttl {
        current
    } else {
        session_ttl
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    /// ## Redis operations performed (atomically)
    /// ```text
    /// SET    directory:session:{hash} {json} EX <ttl>
    /// SADD   directory:session:user:{user_id} {hash}
    /// EXPIRE directory:session:user:{user_id} max(<current>, <ttl>)
    /// ```
    async fn put(
        &self,
        session_id: &str,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> Result<(), SessionStoreError> {
        let ttl = (metadata.expires_at - Utc::now()).num_seconds();
        if ttl <= 0 {
            return Err(SessionStoreError::AlreadyExpired);
        }

        let session_hash = hash_session_id(session_id);
        let session_key = Self::session_key(&session_hash);
        let user_key = Self::user_key(user_id);

        let payload = serde_json::to_string(&SessionRecord { user_id, metadata })
            .map_err(|e| SessionStoreError::Serialization(e.to_string()))?;

        let mut conn = self.get_conn().await?;

        let current_ttl: i64 = conn
            .ttl(&user_key)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        deadpool_redis::redis::pipe()
            .atomic()
            .set_ex(&session_key, payload, ttl as u64)
            .ignore()
            .sadd(&user_key, &session_hash)
            .ignore()
            .expire(&user_key, index_ttl(current_ttl, ttl))
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let key = Self::session_key(&hash_session_id(session_id));
        let mut conn = self.get_conn().await?;

        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let record: SessionRecord = serde_json::from_str(&raw)
            .map_err(|e| SessionStoreError::Serialization(e.to_string()))?;

        // Redis expiry has one-second granularity.
        if record.metadata.is_expired() {
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Deleting an unknown session silently succeeds.
    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let session_hash = hash_session_id(session_id);
        let session_key = Self::session_key(&session_hash);
        let mut conn = self.get_conn().await?;

        let raw: Option<String> = conn
            .get(&session_key)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(());
        };

        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic();
        pipe.del(&session_key).ignore();

        // An undecodable record is still removed; only the index entry is left to expire.
        if let Ok(record) = serde_json::from_str::<SessionRecord>(&raw) {
            pipe.srem(Self::user_key(record.user_id), &session_hash)
                .ignore();
        }

        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    /// ## Redis operations
    /// 1. `SMEMBERS directory:session:user:{user_id}`
    /// 2. `DEL` every listed session key, then the index, in one `MULTI/EXEC`
    ///
    /// Returns how many session keys were still present.
    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, SessionStoreError> {
        let user_key = Self::user_key(user_id);
        let mut conn = self.get_conn().await?;

        let hashes: Vec<String> = conn
            .smembers(&user_key)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        if hashes.is_empty() {
            return Ok(0);
        }

        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic();

        for hash in &hashes {
            pipe.del(Self::session_key(hash));
        }

        pipe.del(&user_key).ignore();

        let removed: Vec<u64> = pipe
            .query_async(&mut *conn)
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        Ok(removed.into_iter().sum())
    }
}
