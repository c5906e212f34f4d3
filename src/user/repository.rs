use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::domain::{User, UserError};

/// Storage boundary for users
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persist a new user. Fails with `DuplicateEmail` if the email is taken.
    async fn save(&self, user: User) -> Result<(), UserError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, UserError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserError>;

    /// Users in insertion order.
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<User>, UserError>;

    async fn count(&self) -> Result<usize, UserError>;
}

#[derive(Default)]
struct Store {
    by_id: HashMap<String, User>,
    id_by_email: HashMap<String, String>,
    order: Vec<String>,
}

/// Process-local repository
#[derive(Default)]
pub struct InMemoryUserRepository {
    store: RwLock<Store>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn save(&self, user: User) -> Result<(), UserError> {
        let mut store = self.store.write().await;

        if store.id_by_email.contains_key(&user.email) {
            return Err(UserError::DuplicateEmail);
        }

        store.id_by_email.insert(user.email.clone(), user.id.clone());
        store.order.push(user.id.clone());
        store.by_id.insert(user.id.clone(), user);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, UserError> {
        let store = self.store.read().await;
        Ok(store.by_id.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserError> {
        let store = self.store.read().await;
        Ok(store
            .id_by_email
            .get(email)
            .and_then(|id| store.by_id.get(id))
            .cloned())
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<User>, UserError> {
        let store = self.store.read().await;
        Ok(store
            .order
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| store.by_id.get(id).cloned())
            .collect())
    }

    async fn count(&self) -> Result<usize, UserError> {
        Ok(self.store.read().await.by_id.len())
    }
}
