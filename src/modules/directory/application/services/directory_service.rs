use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{
    same_key, LookupContext, NewUser, PageRequest, PageResult, SessionMetadata, User,
    UserListFilter, UserLookup, UserPatch, UserSort, UserStatus,
};
use crate::modules::directory::application::domain::merge::merge_patch;
use crate::modules::directory::application::domain::validation::{validate_new_user, validate_patch};
use crate::modules::directory::application::ports::incoming::user_directory::{
    Backend, DirectoryError, ResolvedSession, UserDirectory,
};
use crate::modules::directory::application::ports::outgoing::{
    ListScope, SessionStore, SoftDeleteOutcome, UniqueField, UserCache, UserStore,
    UserStoreError,
};

use super::backend_guard::{best_effort, guard_required, guard_store, BackendTimeouts};

/// The identifying values a write claims, used to report which one collided.
struct Claims<'a> {
    username: &'a str,
    email: &'a str,
    external_id: Option<&'a str>,
}

impl<'a> Claims<'a> {
    fn of_new(user: &'a NewUser) -> Self {
        Self {
            username: &user.username,
            email: &user.email,
            external_id: user.external_id.as_deref(),
        }
    }

    fn of_user(user: &'a User) -> Self {
        Self {
            username: &user.username,
            email: &user.email,
            external_id: user.external_id.as_deref(),
        }
    }

    fn conflict(&self, field: UniqueField) -> DirectoryError {
        let value = match field {
            UniqueField::Username => self.username,
            UniqueField::Email => self.email,
            UniqueField::ExternalId => self.external_id.unwrap_or_default(),
        };
        DirectoryError::AlreadyExists {
            field: field.as_str(),
            value: value.to_string(),
        }
    }
}

/// Cache-coherent front of the user store.
///
/// Ordering of backend calls:
/// - reads: cache, confirmed against the store, then store on miss
/// - writes: store, then cache
/// - deletes: store, then cache eviction, then session purge
///
/// Only the store can fail an operation. Cache and session failures are
/// logged and treated as a miss or a no-op, except where a session must be
/// recorded or read for the caller to proceed.
#[derive(Clone)]
pub struct DirectoryService {
    store: Arc<dyn UserStore>,
    cache: Arc<dyn UserCache>,
    sessions: Arc<dyn SessionStore>,
    timeouts: BackendTimeouts,
}

impl DirectoryService {
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: Arc<dyn UserCache>,
        sessions: Arc<dyn SessionStore>,
        timeouts: BackendTimeouts,
    ) -> Self {
        Self {
            store,
            cache,
            sessions,
            timeouts,
        }
    }

    fn store_failed(
        operation: &'static str,
        lookup: Option<&UserLookup>,
        claims: Option<&Claims<'_>>,
        err: UserStoreError,
    ) -> DirectoryError {
        match err {
            UserStoreError::UserNotFound => match lookup {
                Some(lookup) => DirectoryError::user_not_found(lookup),
                None => DirectoryError::NotFound {
                    entity: "user",
                    key: operation.to_string(),
                },
            },
            UserStoreError::AlreadyExists(field) => match claims {
                Some(claims) => claims.conflict(field),
                None => DirectoryError::AlreadyExists {
                    field: field.as_str(),
                    value: lookup.map(UserLookup::value).unwrap_or_default(),
                },
            },
            UserStoreError::NotDeleted(status) => DirectoryError::InvalidState {
                operation,
                current_state: status.to_string(),
            },
            UserStoreError::DatabaseError(msg) => {
                error!(operation, error = %msg, "user store call failed");
                DirectoryError::unavailable(Backend::UserStore)
            }
            UserStoreError::Timeout => {
                error!(operation, "user store call timed out");
                DirectoryError::unavailable(Backend::UserStore)
            }
        }
    }

    async fn store_lookup(&self, lookup: &UserLookup) -> Result<Option<User>, UserStoreError> {
        let limit = self.timeouts.store;
        match lookup {
            UserLookup::Id(id) => guard_store(limit, self.store.get_by_id(*id)).await,
            UserLookup::Email(email) => guard_store(limit, self.store.get_by_email(email)).await,
            UserLookup::Username(username) => {
                guard_store(limit, self.store.get_by_username(username)).await
            }
            UserLookup::ExternalId(external_id) => {
                guard_store(limit, self.store.get_by_external_id(external_id)).await
            }
        }
    }

    /// Loads the row behind `id`, treating deleted rows as absent.
    async fn load_live(&self, operation: &'static str, id: Uuid) -> Result<User, DirectoryError> {
        let lookup = UserLookup::Id(id);
        guard_store(self.timeouts.store, self.store.get_by_id(id))
            .await
            .map_err(|e| Self::store_failed(operation, Some(&lookup), None, e))?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| DirectoryError::user_not_found(&lookup))
    }

    /// Fails with `AlreadyExists` when a live row already uses `value`.
    async fn ensure_unclaimed(
        &self,
        operation: &'static str,
        field: UniqueField,
        value: &str,
    ) -> Result<(), DirectoryError> {
        let limit = self.timeouts.store;
        let taken = match field {
            UniqueField::Username => guard_store(limit, self.store.exists_by_username(value)).await,
            UniqueField::Email => guard_store(limit, self.store.exists_by_email(value)).await,
            UniqueField::ExternalId => {
                guard_store(limit, self.store.exists_by_external_id(value)).await
            }
        }
        .map_err(|e| Self::store_failed(operation, None, None, e))?;

        if taken {
            return Err(DirectoryError::AlreadyExists {
                field: field.as_str(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    async fn ensure_claims_free(
        &self,
        operation: &'static str,
        claims: &Claims<'_>,
    ) -> Result<(), DirectoryError> {
        self.ensure_unclaimed(operation, UniqueField::Username, claims.username)
            .await?;
        self.ensure_unclaimed(operation, UniqueField::Email, claims.email)
            .await?;
        if let Some(external_id) = claims.external_id {
            self.ensure_unclaimed(operation, UniqueField::ExternalId, external_id)
                .await?;
        }
        Ok(())
    }

    async fn cache_get(&self, lookup: &UserLookup) -> Option<User> {
        best_effort(
            Backend::UserCache,
            "get",
            self.timeouts.cache,
            self.cache.get(lookup),
        )
        .await
        .flatten()
    }

    async fn cache_put(&self, user: &User) {
        best_effort(
            Backend::UserCache,
            "put",
            self.timeouts.cache,
            self.cache.put(user),
        )
        .await;
    }

    async fn cache_evict_user(&self, user: &User) {
        best_effort(
            Backend::UserCache,
            "evict_user",
            self.timeouts.cache,
            self.cache.evict_user(user),
        )
        .await;
    }

    async fn cache_evict(&self, lookup: &UserLookup) {
        best_effort(
            Backend::UserCache,
            "evict",
            self.timeouts.cache,
            self.cache.evict(lookup),
        )
        .await;
    }

    /// Confirms a cache hit against the store. `Ok(None)` means the entry was
    /// stale for this lookup and has been evicted; the caller falls back to
    /// the store.
    async fn confirm_hit(
        &self,
        lookup: &UserLookup,
        context: LookupContext,
        cached: User,
    ) -> Result<Option<User>, DirectoryError> {
        let limit = self.timeouts.store;

        match context {
            LookupContext::Standard => {
                let live = guard_store(limit, self.store.exists_by_id(cached.id))
                    .await
                    .map_err(|e| Self::store_failed("get_user", Some(lookup), None, e))?;

                if live {
                    return Ok(Some(cached));
                }

                debug!(user_id = %cached.id, %lookup, "cached user has no live row; evicting");
                self.cache_evict_user(&cached).await;
                Err(DirectoryError::user_not_found(lookup))
            }
            LookupContext::Sensitive => {
                let fresh = guard_store(limit, self.store.get_by_id(cached.id))
                    .await
                    .map_err(|e| Self::store_failed("get_user", Some(lookup), None, e))?;

                match fresh {
                    Some(row) if !row.is_deleted() => {
                        if row == cached {
                            return Ok(Some(row));
                        }
                        self.cache_evict_user(&cached).await;
                        if row.answers_to(lookup) {
                            self.cache_put(&row).await;
                            return Ok(Some(row));
                        }
                        debug!(user_id = %row.id, %lookup, "cached alias moved to another value");
                        Ok(None)
                    }
                    _ => {
                        debug!(user_id = %cached.id, %lookup, "cached user has no live row; evicting");
                        self.cache_evict_user(&cached).await;
                        Err(DirectoryError::user_not_found(lookup))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl UserDirectory for DirectoryService {
    async fn create_user(&self, user: NewUser) -> Result<User, DirectoryError> {
        let user = validate_new_user(user)?;
        let claims = Claims::of_new(&user);

        self.ensure_claims_free("create_user", &claims).await?;

        // The unique indexes still catch a concurrent create that slipped past the checks.
        let created = guard_store(self.timeouts.store, self.store.add(user.clone()))
            .await
            .map_err(|e| {
                Self::store_failed("create_user", None, Some(&claims), e)
            })?;

        self.cache_put(&created).await;
        info!(user_id = %created.id, "user created");

        Ok(created)
    }

    async fn get_user(
        &self,
        lookup: UserLookup,
        context: LookupContext,
    ) -> Result<User, DirectoryError> {
        if let Some(cached) = self.cache_get(&lookup).await {
            if let Some(user) = self.confirm_hit(&lookup, context, cached).await? {
                return Ok(user);
            }
        }

        let row = self
            .store_lookup(&lookup)
            .await
            .map_err(|e| Self::store_failed("get_user", Some(&lookup), None, e))?;

        match row {
            Some(user) if !user.is_deleted() => {
                self.cache_put(&user).await;
                Ok(user)
            }
            _ => Err(DirectoryError::user_not_found(&lookup)),
        }
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> Result<User, DirectoryError> {
        let patch = validate_patch(patch)?;
        let existing = self.load_live("update_user", id).await?;

        if let Some(username) = &patch.username {
            if !same_key(username, &existing.username) {
                self.ensure_unclaimed("update_user", UniqueField::Username, username)
                    .await?;
            }
        }
        if let Some(email) = &patch.email {
            if !same_key(email, &existing.email) {
                self.ensure_unclaimed("update_user", UniqueField::Email, email)
                    .await?;
            }
        }
        if let Some(external_id) = patch.external_id.as_set() {
            if existing.external_id.as_deref() != Some(external_id.as_str()) {
                self.ensure_unclaimed("update_user", UniqueField::ExternalId, external_id)
                    .await?;
            }
        }

        let merged = merge_patch(existing.clone(), patch, Utc::now());

        let saved = guard_store(self.timeouts.store, self.store.update(merged.clone()))
            .await
            .map_err(|e| {
                Self::store_failed(
                    "update_user",
                    Some(&UserLookup::Id(id)),
                    Some(&Claims::of_user(&merged)),
                    e,
                )
            })?;

        // Aliases of the previous payload may no longer apply.
        self.cache_evict_user(&existing).await;
        self.cache_put(&saved).await;
        info!(user_id = %id, "user updated");

        Ok(saved)
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), DirectoryError> {
        let lookup = UserLookup::Id(id);

        let outcome = guard_store(self.timeouts.store, self.store.soft_delete(id))
            .await
            .map_err(|e| Self::store_failed("delete_user", Some(&lookup), None, e))?;

        let (user, first_delete) = match outcome {
            SoftDeleteOutcome::Deleted(user) => (user, true),
            SoftDeleteOutcome::AlreadyDeleted(user) => (user, false),
        };

        // The cached payload may carry aliases older than the row's.
        self.cache_evict(&lookup).await;
        self.cache_evict_user(&user).await;

        let purged = best_effort(
            Backend::SessionStore,
            "delete_all_for_user",
            self.timeouts.sessions,
            self.sessions.delete_all_for_user(id),
        )
        .await;

        if purged.is_none() {
            warn!(user_id = %id, "sessions not purged; resolve_session will reject them");
        }

        if !first_delete {
            return Err(DirectoryError::user_not_found(&lookup));
        }

        info!(user_id = %id, sessions_purged = purged.unwrap_or(0), "user deleted");
        Ok(())
    }

    async fn restore_user(&self, id: Uuid) -> Result<User, DirectoryError> {
        let lookup = UserLookup::Id(id);

        let row = guard_store(self.timeouts.store, self.store.get_by_id(id))
            .await
            .map_err(|e| Self::store_failed("restore", Some(&lookup), None, e))?
            .ok_or_else(|| DirectoryError::user_not_found(&lookup))?;

        if !row.is_deleted() {
            return Err(DirectoryError::InvalidState {
                operation: "restore",
                current_state: row.status.to_string(),
            });
        }

        let claims = Claims::of_user(&row);
        self.ensure_claims_free("restore", &claims).await?;

        let restored = guard_store(self.timeouts.store, self.store.restore(id))
            .await
            .map_err(|e| Self::store_failed("restore", Some(&lookup), Some(&claims), e))?;

        self.cache_put(&restored).await;
        info!(user_id = %id, "user restored");

        Ok(restored)
    }

    async fn list_users(
        &self,
        filter: UserListFilter,
        page: PageRequest,
        sort: UserSort,
    ) -> Result<PageResult<User>, DirectoryError> {
        let scope = if filter.include_deleted {
            ListScope::All
        } else {
            ListScope::Active
        };

        guard_store(
            self.timeouts.store,
            self.store.list(scope, filter, sort, page.normalized()),
        )
        .await
        .map_err(|e| Self::store_failed("list_users", None, None, e))
    }

    async fn open_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> Result<(), DirectoryError> {
        if session_id.trim().is_empty() {
            return Err(DirectoryError::Validation {
                field: "session_id",
                reason: "must not be empty".to_string(),
            });
        }
        if metadata.is_expired() || metadata.expires_at <= metadata.issued_at {
            return Err(DirectoryError::Validation {
                field: "expires_at",
                reason: "must be in the future and after issued_at".to_string(),
            });
        }

        let user = self.load_live("open_session", user_id).await?;
        if user.status != UserStatus::Active {
            return Err(DirectoryError::InvalidState {
                operation: "open a session for",
                current_state: user.status.to_string(),
            });
        }

        guard_required(
            Backend::SessionStore,
            "put",
            self.timeouts.sessions,
            self.sessions.put(session_id, user_id, metadata),
        )
        .await?;

        debug!(user_id = %user_id, "session opened");
        Ok(())
    }

    async fn resolve_session(&self, session_id: &str) -> Result<ResolvedSession, DirectoryError> {
        let session = guard_required(
            Backend::SessionStore,
            "get",
            self.timeouts.sessions,
            self.sessions.get(session_id),
        )
        .await?
        .filter(|s| !s.metadata.is_expired())
        .ok_or_else(DirectoryError::session_not_found)?;

        let user = match self
            .get_user(UserLookup::Id(session.user_id), LookupContext::Sensitive)
            .await
        {
            Ok(user) if user.status == UserStatus::Active => user,
            Ok(_) | Err(DirectoryError::NotFound { .. }) => {
                info!(user_id = %session.user_id, "session outlived its account; revoking");
                best_effort(
                    Backend::SessionStore,
                    "delete",
                    self.timeouts.sessions,
                    self.sessions.delete(session_id),
                )
                .await;
                return Err(DirectoryError::session_not_found());
            }
            Err(e) => return Err(e),
        };

        Ok(ResolvedSession { session, user })
    }

    async fn revoke_session(&self, session_id: &str) -> Result<(), DirectoryError> {
        guard_required(
            Backend::SessionStore,
            "delete",
            self.timeouts.sessions,
            self.sessions.delete(session_id),
        )
        .await
    }

    async fn record_login(&self, id: Uuid) -> Result<User, DirectoryError> {
        let user = guard_store(self.timeouts.store, self.store.record_login(id, Utc::now()))
            .await
            .map_err(|e| Self::store_failed("record_login", Some(&UserLookup::Id(id)), None, e))?;

        self.cache_put(&user).await;

        Ok(user)
    }
}
