//! Persistence collaborators
//!
//! The gateway never talks to a database directly. Everything it needs from
//! persistence goes through [`UserStore`] and [`ClientStore`]. Implementations
//! must enforce uniqueness of `(provider, external_id)` themselves and report a
//! losing concurrent insert as [`StoreError::Duplicate`].

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Client, User};

pub use memory::InMemoryStore;

use std::future::Future;
use std::time::Duration;

/// Bound a store call. Expiry is reported as [`StoreError::Timeout`].
///
/// # Errors
///
/// Returns the store's own error, or `Timeout` if `limit` elapses first.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_exists(&self, provider: &str, external_id: &str) -> Result<bool, StoreError>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<User, StoreError>;

    async fn get_user_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<User, StoreError>;

    async fn insert_user(&self, user: User) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn client_exists(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_client_by_id(&self, id: Uuid) -> Result<Client, StoreError>;

    async fn insert_client(&self, client: Client) -> Result<(), StoreError>;
}
