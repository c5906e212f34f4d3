use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_NAME_LENGTH: usize = 200;
pub const MIN_EMAIL_LENGTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error("invalid name")]
    InvalidName,
    #[error("invalid email format")]
    InvalidEmail,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("storage failure: {0}")]
    Storage(String),
}

/// User aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a validated user. The name is trimmed, the email trimmed and lowercased.
    pub fn new(
        id: impl Into<String>,
        name: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, UserError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
            return Err(UserError::InvalidName);
        }

        let email = normalize_email(email);
        if !looks_like_email(&email) {
            return Err(UserError::InvalidEmail);
        }

        Ok(Self {
            id: id.into(),
            name: name.to_string(),
            email,
            created_at: now,
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    email.len() >= MIN_EMAIL_LENGTH && email.matches('@').count() == 1 && email.contains('.')
}
