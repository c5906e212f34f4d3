use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::domain::{User, UserError, normalize_email};
use super::repository::UserRepository;
use crate::metrics::METRICS;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// One page of users plus the total number stored.
#[derive(Debug, Clone)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

pub struct UserService {
    repo: Arc<dyn UserRepository>,
    default_page_size: usize,
    max_page_size: usize,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self::with_page_sizes(repo, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE)
    }

    pub fn with_page_sizes(
        repo: Arc<dyn UserRepository>,
        default_page_size: usize,
        max_page_size: usize,
    ) -> Self {
        Self {
            repo,
            default_page_size,
            max_page_size,
        }
    }

    pub async fn create_user(&self, name: &str, email: &str) -> Result<User, UserError> {
        if self
            .repo
            .find_by_email(&normalize_email(email))
            .await?
            .is_some()
        {
            warn!("Duplicate email attempted");
            return Err(UserError::DuplicateEmail);
        }

        let user = User::new(Uuid::new_v4().to_string(), name, email, Utc::now())?;
        self.repo.save(user.clone()).await?;

        METRICS.users_created_total.inc();
        info!(user_id = %user.id, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User, UserError> {
        match self.repo.find_by_id(id).await? {
            Some(user) => Ok(user),
            None => {
                warn!(user_id = %id, "User not found");
                Err(UserError::NotFound)
            }
        }
    }

    /// List users. A zero or oversized `limit` falls back to the default page size.
    pub async fn list_users(&self, offset: usize, limit: usize) -> Result<UserPage, UserError> {
        let limit = if limit == 0 || limit > self.max_page_size {
            self.default_page_size
        } else {
            limit
        };

        let users = self.repo.list(offset, limit).await?;
        let total = self.repo.count().await?;
        Ok(UserPage {
            users,
            total,
            offset,
            limit,
        })
    }
}
