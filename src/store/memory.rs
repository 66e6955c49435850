use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ClientStore, UserStore};
use crate::errors::StoreError;
use crate::models::{Client, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    // (provider, external_id) -> user id
    external_index: HashMap<(String, String), Uuid>,
    clients: HashMap<Uuid, Client>,
}

/// Process-local store backing both collaborator traits.
///
/// Inserts take the write lock for the whole check-and-insert, which gives
/// the same guarantee as a unique index on `(provider, external_id)`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }

    pub async fn client_count(&self) -> usize {
        self.tables.read().await.clients.len()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn user_exists(&self, provider: &str, external_id: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .external_index
            .contains_key(&(provider.to_string(), external_id.to_string())))
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_user_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<User, StoreError> {
        let tables = self.tables.read().await;
        let id = tables
            .external_index
            .get(&(provider.to_string(), external_id.to_string()))
            .ok_or(StoreError::NotFound)?;
        tables.users.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let key = (user.provider.clone(), user.external_id.clone());
        if tables.external_index.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("{}:{}", key.0, key.1)));
        }
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate(user.id.to_string()));
        }
        debug!("Inserting user {} for provider {}", user.id, user.provider);
        tables.external_index.insert(key, user.id);
        tables.users.insert(user.id, user);
        Ok(())
    }
}

#[async_trait]
impl ClientStore for InMemoryStore {
    async fn client_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.clients.contains_key(&id))
    }

    async fn get_client_by_id(&self, id: Uuid) -> Result<Client, StoreError> {
        self.tables
            .read()
            .await
            .clients
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_client(&self, client: Client) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.clients.contains_key(&client.id) {
            return Err(StoreError::Duplicate(client.id.to_string()));
        }
        tables.clients.insert(client.id, client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExternalIdentity;

    fn user(external_id: &str) -> User {
        User::from_identity(&ExternalIdentity::new(
            "google",
            external_id.to_string(),
            "Test User".to_string(),
            None,
            false,
        ))
    }

    #[tokio::test]
    async fn test_duplicate_external_id_is_rejected() {
        let store = InMemoryStore::new();
        store.insert_user(user("ext-1")).await.unwrap();

        let result = store.insert_user(user("ext-1")).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_external_id_on_other_provider_is_distinct() {
        let store = InMemoryStore::new();
        store.insert_user(user("ext-1")).await.unwrap();

        let mut other = user("ext-1");
        other.provider = "microsoft".to_string();
        store.insert_user(other).await.unwrap();

        assert_eq!(store.user_count().await, 2);
        assert!(store.user_exists("microsoft", "ext-1").await.unwrap());
        assert!(!store.user_exists("microsoft", "ext-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_by_external_id() {
        let store = InMemoryStore::new();
        let created = user("ext-7");
        store.insert_user(created.clone()).await.unwrap();

        let found = store.get_user_by_external_id("google", "ext-7").await.unwrap();
        assert_eq!(found, created);
        assert_eq!(store.get_user_by_id(created.id).await.unwrap(), created);
        assert_eq!(
            store.get_user_by_external_id("google", "missing").await,
            Err(StoreError::NotFound)
        );
    }
}
