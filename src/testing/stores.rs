//! Instrumented and misbehaving store implementations

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Client, User};
use crate::store::{ClientStore, InMemoryStore, UserStore};

/// In-memory store that counts every user-table call
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    user_calls: Arc<AtomicUsize>,
}

impl CountingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Number of `UserStore` calls made so far
    #[must_use]
    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserStore for CountingStore {
    async fn user_exists(&self, provider: &str, external_id: &str) -> Result<bool, StoreError> {
        self.record();
        self.inner.user_exists(provider, external_id).await
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        self.record();
        self.inner.get_user_by_id(id).await
    }

    async fn get_user_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<User, StoreError> {
        self.record();
        self.inner.get_user_by_external_id(provider, external_id).await
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        self.record();
        self.inner.insert_user(user).await
    }
}

#[async_trait]
impl ClientStore for CountingStore {
    async fn client_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.client_exists(id).await
    }

    async fn get_client_by_id(&self, id: Uuid) -> Result<Client, StoreError> {
        self.inner.get_client_by_id(id).await
    }

    async fn insert_client(&self, client: Client) -> Result<(), StoreError> {
        self.inner.insert_client(client).await
    }
}

/// Simulates losing an insert race: the user looks absent, the insert
/// reports `Duplicate`, and the re-read returns another writer's row.
pub struct DuplicateOnInsertStore {
    winner_id: Uuid,
}

impl DuplicateOnInsertStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            winner_id: Uuid::new_v4(),
        }
    }

    #[must_use]
    pub fn winner_id(&self) -> Uuid {
        self.winner_id
    }

    fn winner(&self, provider: &str, external_id: &str) -> User {
        let now = Utc::now();
        User {
            id: self.winner_id,
            display_name: "Winner".to_string(),
            provider: provider.to_string(),
            external_id: external_id.to_string(),
            email: None,
            created: now,
            last_updated: now,
        }
    }
}

impl Default for DuplicateOnInsertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for DuplicateOnInsertStore {
    async fn user_exists(&self, _provider: &str, _external_id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        if id == self.winner_id {
            Ok(self.winner("google", "winner"))
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn get_user_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<User, StoreError> {
        Ok(self.winner(provider, external_id))
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        Err(StoreError::Duplicate(format!(
            "{}:{}",
            user.provider, user.external_id
        )))
    }
}

/// Every call fails with a backend error
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::Backend("database unavailable".to_string())
}

#[async_trait]
impl UserStore for FailingStore {
    async fn user_exists(&self, _provider: &str, _external_id: &str) -> Result<bool, StoreError> {
        Err(unavailable())
    }

    async fn get_user_by_id(&self, _id: Uuid) -> Result<User, StoreError> {
        Err(unavailable())
    }

    async fn get_user_by_external_id(
        &self,
        _provider: &str,
        _external_id: &str,
    ) -> Result<User, StoreError> {
        Err(unavailable())
    }

    async fn insert_user(&self, _user: User) -> Result<(), StoreError> {
        Err(unavailable())
    }
}

#[async_trait]
impl ClientStore for FailingStore {
    async fn client_exists(&self, _id: Uuid) -> Result<bool, StoreError> {
        Err(unavailable())
    }

    async fn get_client_by_id(&self, _id: Uuid) -> Result<Client, StoreError> {
        Err(unavailable())
    }

    async fn insert_client(&self, _client: Client) -> Result<(), StoreError> {
        Err(unavailable())
    }
}

/// Delays every user call before delegating to an in-memory store
pub struct SlowStore {
    delay: Duration,
    inner: InMemoryStore,
}

impl SlowStore {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: InMemoryStore::new(),
        }
    }
}

#[async_trait]
impl UserStore for SlowStore {
    async fn user_exists(&self, provider: &str, external_id: &str) -> Result<bool, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.user_exists(provider, external_id).await
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_user_by_id(id).await
    }

    async fn get_user_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<User, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_user_by_external_id(provider, external_id).await
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_user(user).await
    }
}
