use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{
    same_key, NewUser, PageRequest, PageResult, SessionMetadata, SessionRecord, SortDirection,
    User, UserListFilter, UserLookup, UserSort, UserSortField, UserStatus,
};
use crate::modules::directory::application::ports::outgoing::{
    CacheError, ListScope, SessionStore, SessionStoreError, SoftDeleteOutcome, UniqueField,
    UserCache, UserStore, UserStoreError,
};

/// Knobs shared by every fake: an injected failure and an artificial delay.
struct Faults<E> {
    failure: Option<E>,
    delay: Option<Duration>,
}

impl<E> Default for Faults<E> {
    fn default() -> Self {
        Self {
            failure: None,
            delay: None,
        }
    }
}

impl<E: Clone> Faults<E> {
    async fn apply(faults: &Mutex<Faults<E>>) -> Result<(), E> {
        let (failure, delay) = {
            let f = faults.lock().unwrap();
            (f.failure.clone(), f.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn same_text(a: &str, b: &str) -> bool {
    same_key(a, b)
}

// ──────────────────────────────────────────────────────────
// UserStore
// ──────────────────────────────────────────────────────────

/// Row-level fake of the Postgres store, including the partial unique indexes.
#[derive(Default)]
pub struct InMemoryUserStore {
    rows: Mutex<HashMap<Uuid, User>>,
    faults: Mutex<Faults<UserStoreError>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row as-is, bypassing uniqueness.
    pub fn seed(&self, user: User) {
        self.rows.lock().unwrap().insert(user.id, user);
    }

    pub fn row(&self, id: Uuid) -> Option<User> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    /// Hard-removes a row behind the directory's back.
    pub fn remove_row(&self, id: Uuid) {
        self.rows.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn fail_with(&self, error: UserStoreError) {
        self.faults.lock().unwrap().failure = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.faults.lock().unwrap().delay = Some(delay);
    }

    fn find<P>(&self, predicate: P) -> Option<User>
    where
        P: Fn(&User) -> bool,
    {
        let rows = self.rows.lock().unwrap();
        let mut matches: Vec<&User> = rows.values().filter(|u| predicate(u)).collect();
        matches.sort_by_key(|u| (u.is_deleted(), std::cmp::Reverse(u.created_at)));
        matches.first().map(|u| (*u).clone())
    }

    fn conflict(rows: &HashMap<Uuid, User>, candidate: &User) -> Option<UniqueField> {
        let live = rows
            .values()
            .filter(|u| !u.is_deleted() && u.id != candidate.id);

        for other in live {
            if let (Some(a), Some(b)) = (&other.external_id, &candidate.external_id) {
                if a == b {
                    return Some(UniqueField::ExternalId);
                }
            }
            if same_text(&other.username, &candidate.username) {
                return Some(UniqueField::Username);
            }
            if same_text(&other.email, &candidate.email) {
                return Some(UniqueField::Email);
            }
        }
        None
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self.row(id))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self.find(|u| same_text(&u.email, email)))
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self.find(|u| same_text(&u.username, username)))
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self.find(|u| u.external_id.as_deref() == Some(external_id.trim())))
    }

    async fn list(
        &self,
        scope: ListScope,
        filter: UserListFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<PageResult<User>, UserStoreError> {
        Faults::apply(&self.faults).await?;
        let page = page.normalized();
        let search = filter.search.as_deref().map(|s| s.trim().to_lowercase());

        let mut users: Vec<User> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|u| match scope {
                ListScope::All => true,
                ListScope::Active => !u.is_deleted(),
                ListScope::Deleted => u.is_deleted(),
            })
            .filter(|u| filter.status.map_or(true, |s| u.status == s))
            .filter(|u| {
                search.as_deref().map_or(true, |s| {
                    u.username.to_lowercase().contains(s) || u.email.to_lowercase().contains(s)
                })
            })
            .cloned()
            .collect();

        users.sort_by(|a, b| {
            let ordering = match sort.field {
                UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                UserSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                UserSortField::Username => a.username.cmp(&b.username),
                UserSortField::Email => a.email.cmp(&b.email),
            };
            let ordering = match sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            ordering.then(a.id.cmp(&b.id))
        });

        let total = users.len() as u64;
        let items = users
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();

        Ok(PageResult {
            items,
            page: page.page,
            page_size: page.page_size,
            total,
        })
    }

    async fn add(&self, user: NewUser) -> Result<User, UserStoreError> {
        Faults::apply(&self.faults).await?;
        let row = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            external_id: user.external_id,
            password_hash: user.password_hash,
            status: UserStatus::Active,
            is_verified: false,
            created_at: Utc::now(),
            updated_at: None,
            last_login_at: None,
            deleted_at: None,
        };

        let mut rows = self.rows.lock().unwrap();
        if let Some(field) = Self::conflict(&rows, &row) {
            return Err(UserStoreError::AlreadyExists(field));
        }
        rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, user: User) -> Result<User, UserStoreError> {
        Faults::apply(&self.faults).await?;
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .get(&user.id)
            .filter(|row| !row.is_deleted())
            .ok_or(UserStoreError::UserNotFound)?;

        let row = User {
            created_at: existing.created_at,
            deleted_at: existing.deleted_at,
            last_login_at: existing.last_login_at,
            updated_at: Some(Utc::now()),
            ..user
        };
        if let Some(field) = Self::conflict(&rows, &row) {
            return Err(UserStoreError::AlreadyExists(field));
        }
        rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<SoftDeleteOutcome, UserStoreError> {
        Faults::apply(&self.faults).await?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(UserStoreError::UserNotFound)?;

        if row.is_deleted() {
            return Ok(SoftDeleteOutcome::AlreadyDeleted(row.clone()));
        }
        row.deleted_at = Some(Utc::now());
        row.status = UserStatus::Banned;
        Ok(SoftDeleteOutcome::Deleted(row.clone()))
    }

    async fn restore(&self, id: Uuid) -> Result<User, UserStoreError> {
        Faults::apply(&self.faults).await?;
        let mut rows = self.rows.lock().unwrap();
        let existing = rows.get(&id).cloned().ok_or(UserStoreError::UserNotFound)?;

        if !existing.is_deleted() {
            return Err(UserStoreError::NotDeleted(existing.status));
        }
        let restored = User {
            deleted_at: None,
            status: UserStatus::Active,
            updated_at: Some(Utc::now()),
            ..existing
        };
        if let Some(field) = Self::conflict(&rows, &restored) {
            return Err(UserStoreError::AlreadyExists(field));
        }
        rows.insert(id, restored.clone());
        Ok(restored)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, UserStoreError> {
        Faults::apply(&self.faults).await?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if !row.is_deleted() => {
                row.last_login_at = Some(at);
                Ok(row.clone())
            }
            _ => Err(UserStoreError::UserNotFound),
        }
    }

    async fn exists_by_id(&self, id: Uuid) -> Result<bool, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self.row(id).is_some_and(|u| !u.is_deleted()))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self
            .find(|u| !u.is_deleted() && same_text(&u.email, email))
            .is_some())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self
            .find(|u| !u.is_deleted() && same_text(&u.username, username))
            .is_some())
    }

    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, UserStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self
            .find(|u| !u.is_deleted() && u.external_id.as_deref() == Some(external_id.trim()))
            .is_some())
    }
}

// ──────────────────────────────────────────────────────────
// UserCache
// ──────────────────────────────────────────────────────────

/// Mirrors the Redis layout: payloads by id, aliases pointing at ids.
#[derive(Default)]
pub struct InMemoryUserCache {
    payloads: Mutex<HashMap<Uuid, User>>,
    aliases: Mutex<HashMap<String, Uuid>>,
    faults: Mutex<Faults<CacheError>>,
}

impl InMemoryUserCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn alias_key(lookup: &UserLookup) -> Option<String> {
        match lookup {
            UserLookup::Id(_) => None,
            UserLookup::Email(v) => Some(format!("email:{}", v.trim().to_lowercase())),
            UserLookup::Username(v) => Some(format!("username:{}", v.trim().to_lowercase())),
            UserLookup::ExternalId(v) => Some(format!("external:{}", v.trim())),
        }
    }

    fn resolve(&self, lookup: &UserLookup) -> Option<Uuid> {
        match lookup {
            UserLookup::Id(id) => Some(*id),
            other => Self::alias_key(other)
                .and_then(|key| self.aliases.lock().unwrap().get(&key).copied()),
        }
    }

    /// Writes a payload and its aliases without going through the trait, so a
    /// test can plant entries the store knows nothing about.
    pub fn plant(&self, user: &User) {
        self.payloads.lock().unwrap().insert(user.id, user.clone());
        let mut aliases = self.aliases.lock().unwrap();
        for lookup in user.lookup_keys() {
            if let Some(key) = Self::alias_key(&lookup) {
                aliases.insert(key, user.id);
            }
        }
    }

    pub fn payload(&self, id: Uuid) -> Option<User> {
        self.payloads.lock().unwrap().get(&id).cloned()
    }

    /// Whether the addressed key is present at all, payload or alias.
    pub fn has_key(&self, lookup: &UserLookup) -> bool {
        match lookup {
            UserLookup::Id(id) => self.payloads.lock().unwrap().contains_key(id),
            other => Self::alias_key(other)
                .is_some_and(|key| self.aliases.lock().unwrap().contains_key(&key)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.lock().unwrap().is_empty() && self.aliases.lock().unwrap().is_empty()
    }

    pub fn fail_with(&self, error: CacheError) {
        self.faults.lock().unwrap().failure = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.faults.lock().unwrap().delay = Some(delay);
    }

    fn drop_user(&self, user: &User) {
        self.payloads.lock().unwrap().remove(&user.id);
        let mut aliases = self.aliases.lock().unwrap();
        for lookup in user.lookup_keys() {
            if let Some(key) = Self::alias_key(&lookup) {
                aliases.remove(&key);
            }
        }
    }
}

#[async_trait]
impl UserCache for InMemoryUserCache {
    async fn put(&self, user: &User) -> Result<(), CacheError> {
        Faults::apply(&self.faults).await?;
        self.plant(user);
        Ok(())
    }

    async fn get(&self, lookup: &UserLookup) -> Result<Option<User>, CacheError> {
        Faults::apply(&self.faults).await?;
        Ok(self
            .resolve(lookup)
            .and_then(|id| self.payload(id))
            .filter(|u| u.answers_to(lookup)))
    }

    async fn evict(&self, lookup: &UserLookup) -> Result<(), CacheError> {
        Faults::apply(&self.faults).await?;
        let target = self.resolve(lookup);
        if let Some(key) = Self::alias_key(lookup) {
            self.aliases.lock().unwrap().remove(&key);
        }
        if let Some(id) = target {
            if let Some(user) = self.payload(id) {
                self.drop_user(&user);
            }
            self.payloads.lock().unwrap().remove(&id);
        }
        Ok(())
    }

    async fn evict_user(&self, user: &User) -> Result<(), CacheError> {
        Faults::apply(&self.faults).await?;
        self.drop_user(user);
        Ok(())
    }
}

// ──────────────────────────────────────────────────────────
// SessionStore
// ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    faults: Mutex<Faults<SessionStoreError>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(session_id)
    }

    /// Records a session without any check, as a concurrent writer would.
    pub fn plant(&self, session_id: &str, user_id: Uuid, metadata: SessionMetadata) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), SessionRecord { user_id, metadata });
    }

    pub fn count_for(&self, user_id: Uuid) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.user_id == user_id)
            .count()
    }

    pub fn fail_with(&self, error: SessionStoreError) {
        self.faults.lock().unwrap().failure = Some(error);
    }

    pub fn clear_failure(&self) {
        self.faults.lock().unwrap().failure = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.faults.lock().unwrap().delay = Some(delay);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(
        &self,
        session_id: &str,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> Result<(), SessionStoreError> {
        Faults::apply(&self.faults).await?;
        if metadata.is_expired() {
            return Err(SessionStoreError::AlreadyExpired);
        }
        self.plant(session_id, user_id, metadata);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        Faults::apply(&self.faults).await?;
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .filter(|r| !r.metadata.is_expired())
            .cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        Faults::apply(&self.faults).await?;
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, SessionStoreError> {
        Faults::apply(&self.faults).await?;
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, r| r.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }
}
