use chrono::{DateTime, Utc};

use super::entities::{User, UserPatch};

/// Applies a validated patch onto the stored row.
///
/// | field                                   | behaviour                                   |
/// |-----------------------------------------|---------------------------------------------|
/// | `username`, `email`, `status`, `is_verified` | overwritten when supplied, kept when `None` |
/// | `external_id`, `password_hash`          | follow `FieldUpdate`: keep, set or clear    |
/// | `updated_at`                            | always set to `now`                         |
/// | `id`, `created_at`, `last_login_at`, `deleted_at` | never touched                    |
pub fn merge_patch(existing: User, patch: UserPatch, now: DateTime<Utc>) -> User {
    User {
        id: existing.id,
        username: patch.username.unwrap_or(existing.username),
        email: patch.email.unwrap_or(existing.email),
        external_id: patch.external_id.apply(existing.external_id),
        password_hash: patch.password_hash.apply(existing.password_hash),
        status: patch.status.unwrap_or(existing.status),
        is_verified: patch.is_verified.unwrap_or(existing.is_verified),
        created_at: existing.created_at,
        updated_at: Some(now),
        last_login_at: existing.last_login_at,
        deleted_at: existing.deleted_at,
    }
}
