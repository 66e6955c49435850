use std::sync::Arc;
use std::time::Duration;

use log::debug;
use uuid::Uuid;

use crate::errors::{StoreError, UserDirectoryError};
use crate::models::{ExternalIdentity, User};
use crate::store::{with_timeout, UserStore};
use crate::utils::logging::LoggingHelper;

/// Maps external provider identities onto local users
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    operation_timeout: Duration,
}

impl UserDirectory {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
        }
    }

    /// Return the local user for `identity`, creating it on first login
    ///
    /// The returned record is always re-read from the store, so a caller that
    /// lost a concurrent insert gets the winner's row.
    ///
    /// # Errors
    ///
    /// Propagates any store failure other than a lost insert race.
    pub async fn find_or_create(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<User, UserDirectoryError> {
        let provider = identity.provider.as_str();
        let external_id = identity.provider_user_id.as_str();

        let exists = with_timeout(
            self.operation_timeout,
            self.store.user_exists(provider, external_id),
        )
        .await
        .map_err(UserDirectoryError::Store)?;

        if !exists {
            let user = User::from_identity(identity);
            let user_id = user.id;
            match with_timeout(self.operation_timeout, self.store.insert_user(user)).await {
                Ok(()) => LoggingHelper::log_user_created(&user_id.to_string(), provider),
                Err(StoreError::Duplicate(_)) => {
                    debug!("User for {provider}:{external_id} was created concurrently");
                }
                Err(e) => return Err(UserDirectoryError::Store(e)),
            }
        }

        with_timeout(
            self.operation_timeout,
            self.store.get_user_by_external_id(provider, external_id),
        )
        .await
        .map_err(|e| match e {
            StoreError::NotFound => UserDirectoryError::NotFound,
            other => UserDirectoryError::Store(other),
        })
    }

    /// Look up a user by local id
    ///
    /// # Errors
    ///
    /// `NotFound` if no such user exists, `Store` on store failure.
    pub async fn get_by_id(&self, id: Uuid) -> Result<User, UserDirectoryError> {
        with_timeout(self.operation_timeout, self.store.get_user_by_id(id))
            .await
            .map_err(|e| match e {
                StoreError::NotFound => UserDirectoryError::NotFound,
                other => UserDirectoryError::Store(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::testing::{DuplicateOnInsertStore, FailingStore, SlowStore};

    fn identity(id: &str) -> ExternalIdentity {
        ExternalIdentity::new(
            "google",
            id.to_string(),
            "Jane".to_string(),
            Some("jane@example.com".to_string()),
            true,
        )
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let store = InMemoryStore::new();
        let directory = UserDirectory::new(Arc::new(store.clone()), Duration::from_secs(1));

        let first = directory.find_or_create(&identity("ext-42")).await.unwrap();
        let second = directory.find_or_create(&identity("ext-42")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.user_count().await, 1);
        assert_eq!(first.email.as_deref(), Some("jane@example.com"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_logins_create_one_user() {
        let store = InMemoryStore::new();
        let directory = UserDirectory::new(Arc::new(store.clone()), Duration::from_secs(1));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let directory = directory.clone();
            tasks.spawn(async move { directory.find_or_create(&identity("ext-race")).await });
        }

        let mut ids = Vec::new();
        while let Some(result) = tasks.join_next().await {
            ids.push(result.unwrap().unwrap().id);
        }

        assert_eq!(ids.len(), 16);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_lost_insert_race_rereads_winner() {
        let store = DuplicateOnInsertStore::new();
        let winner = store.winner_id();
        let directory = UserDirectory::new(Arc::new(store), Duration::from_secs(1));

        let user = directory.find_or_create(&identity("ext-1")).await.unwrap();
        assert_eq!(user.id, winner);
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated() {
        let directory = UserDirectory::new(Arc::new(FailingStore), Duration::from_secs(1));
        let result = directory.find_or_create(&identity("ext-1")).await;
        assert!(matches!(
            result,
            Err(UserDirectoryError::Store(StoreError::Backend(_)))
        ));
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let directory = UserDirectory::new(
            Arc::new(SlowStore::new(Duration::from_millis(200))),
            Duration::from_millis(20),
        );
        let result = directory.find_or_create(&identity("ext-1")).await;
        assert_eq!(result, Err(UserDirectoryError::Store(StoreError::Timeout)));
    }
}
