use email_address::EmailAddress;
use regex::Regex;
use std::sync::OnceLock;

use super::entities::{NewUser, UserPatch};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;
pub const EMAIL_MAX_LEN: usize = 255;
pub const EXTERNAL_ID_MAX_LEN: usize = 255;
pub const PASSWORD_HASH_MAX_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("username pattern is valid")
    })
}

/// Trims the username and checks length and character set. Case is preserved.
pub fn validate_username(username: &str) -> Result<String, ValidationError> {
    let username = username.trim();

    if username.is_empty() {
        return Err(ValidationError::new("username", "cannot be empty"));
    }

    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(ValidationError::new(
            "username",
            format!("must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"),
        ));
    }

    if !username_pattern().is_match(username) {
        return Err(ValidationError::new(
            "username",
            "may only contain letters, digits, '_', '.' and '-', starting with a letter or digit",
        ));
    }

    Ok(username.to_string())
}

/// Trims and lowercases the email, which is its stored canonical form.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();

    if email.is_empty() {
        return Err(ValidationError::new("email", "cannot be empty"));
    }

    if email.len() > EMAIL_MAX_LEN {
        return Err(ValidationError::new(
            "email",
            format!("must be at most {EMAIL_MAX_LEN} characters"),
        ));
    }

    if !EmailAddress::is_valid(email) {
        return Err(ValidationError::new("email", "invalid format"));
    }

    Ok(email.to_lowercase())
}

pub fn validate_external_id(external_id: &str) -> Result<String, ValidationError> {
    let external_id = external_id.trim();

    if external_id.is_empty() {
        return Err(ValidationError::new("external_id", "cannot be empty"));
    }

    if external_id.len() > EXTERNAL_ID_MAX_LEN || external_id.chars().any(char::is_whitespace) {
        return Err(ValidationError::new(
            "external_id",
            format!("must be at most {EXTERNAL_ID_MAX_LEN} characters without whitespace"),
        ));
    }

    Ok(external_id.to_string())
}

pub fn validate_password_hash(password_hash: &str) -> Result<String, ValidationError> {
    if password_hash.trim().is_empty() {
        return Err(ValidationError::new("password_hash", "cannot be empty"));
    }

    if password_hash.len() > PASSWORD_HASH_MAX_LEN {
        return Err(ValidationError::new(
            "password_hash",
            format!("must be at most {PASSWORD_HASH_MAX_LEN} characters"),
        ));
    }

    Ok(password_hash.to_string())
}

/// Returns the normalized payload, or the first field that fails.
pub fn validate_new_user(user: NewUser) -> Result<NewUser, ValidationError> {
    Ok(NewUser {
        username: validate_username(&user.username)?,
        email: validate_email(&user.email)?,
        password_hash: user
            .password_hash
            .as_deref()
            .map(validate_password_hash)
            .transpose()?,
        external_id: user
            .external_id
            .as_deref()
            .map(validate_external_id)
            .transpose()?,
    })
}

/// Validates only the fields a patch sets. `Banned` is reserved for deletion.
pub fn validate_patch(patch: UserPatch) -> Result<UserPatch, ValidationError> {
    use super::entities::FieldUpdate;

    if let Some(status) = patch.status {
        if !status.is_live() {
            return Err(ValidationError::new(
                "status",
                format!("'{status}' can only be reached by deleting the account"),
            ));
        }
    }

    let external_id = match patch.external_id {
        FieldUpdate::Set(value) => FieldUpdate::Set(validate_external_id(&value)?),
        other => other,
    };
    let password_hash = match patch.password_hash {
        FieldUpdate::Set(value) => FieldUpdate::Set(validate_password_hash(&value)?),
        other => other,
    };

    Ok(UserPatch {
        username: patch.username.as_deref().map(validate_username).transpose()?,
        email: patch.email.as_deref().map(validate_email).transpose()?,
        external_id,
        password_hash,
        status: patch.status,
        is_verified: patch.is_verified,
    })
}
