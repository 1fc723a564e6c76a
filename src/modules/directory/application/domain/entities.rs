use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
            UserStatus::Banned => "banned",
        }
    }

    /// Statuses an administrator may move a non-deleted account between.
    pub fn is_live(&self) -> bool {
        !matches!(self, UserStatus::Banned)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown user status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for UserStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "suspended" => Ok(UserStatus::Suspended),
            "banned" => Ok(UserStatus::Banned),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub external_id: Option<String>,
    pub password_hash: Option<String>,
    pub status: UserStatus,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Every key this user can be addressed by, primary id first.
    pub fn lookup_keys(&self) -> Vec<UserLookup> {
        let mut keys = vec![
            UserLookup::Id(self.id),
            UserLookup::Email(self.email.clone()),
            UserLookup::Username(self.username.clone()),
        ];
        if let Some(external_id) = &self.external_id {
            keys.push(UserLookup::ExternalId(external_id.clone()));
        }
        keys
    }

    /// Whether `lookup` still addresses this payload.
    pub fn answers_to(&self, lookup: &UserLookup) -> bool {
        match lookup {
            UserLookup::Id(id) => self.id == *id,
            UserLookup::Email(email) => same_key(&self.email, email),
            UserLookup::Username(username) => same_key(&self.username, username),
            UserLookup::ExternalId(external_id) => {
                self.external_id.as_deref() == Some(external_id.trim())
            }
        }
    }
}

/// Case-insensitive comparison for emails and usernames. Uses the same Unicode
/// lowercasing as cache keys and stored emails.
pub fn same_key(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Payload accepted by account creation. The password is already hashed by the
/// credential layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub external_id: Option<String>,
}

/// Three-state update for optional columns: leave alone, overwrite, or null out.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Unchanged,
    Set(T),
    Clear,
}

impl<T> FieldUpdate<T> {
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            FieldUpdate::Unchanged => current,
            FieldUpdate::Set(value) => Some(value),
            FieldUpdate::Clear => None,
        }
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub external_id: FieldUpdate<String>,
    pub password_hash: FieldUpdate<String>,
    pub status: Option<UserStatus>,
    pub is_verified: Option<bool>,
}

/// A key that addresses exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserLookup {
    Id(Uuid),
    Email(String),
    Username(String),
    ExternalId(String),
}

impl UserLookup {
    pub fn field(&self) -> &'static str {
        match self {
            UserLookup::Id(_) => "id",
            UserLookup::Email(_) => "email",
            UserLookup::Username(_) => "username",
            UserLookup::ExternalId(_) => "external_id",
        }
    }

    pub fn value(&self) -> String {
        match self {
            UserLookup::Id(id) => id.to_string(),
            UserLookup::Email(v) | UserLookup::Username(v) | UserLookup::ExternalId(v) => {
                v.clone()
            }
        }
    }
}

impl fmt::Display for UserLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field(), self.value())
    }
}

/// Whether a lookup feeds an authentication or authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupContext {
    #[default]
    Standard,
    Sensitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionMetadata {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub metadata: SessionMetadata,
}

// ──────────────────────────────────────────────────────────
// Listing
// ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserListFilter {
    pub status: Option<UserStatus>,
    pub search: Option<String>,
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Username,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserSort {
    pub field: UserSortField,
    pub direction: SortDirection,
}

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Clamp to a 1-based page and a page size within `1..=MAX_PAGE_SIZE`.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}
