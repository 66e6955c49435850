use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use log::{debug, error, warn};
use uuid::Uuid;

use crate::errors::{ClientValidationError, ConfigurationError, StoreError};
use crate::models::Client;
use crate::settings::ClientSettings;
use crate::store::{with_timeout, ClientStore};
use crate::utils::crypto::generate_client_secret;
use crate::utils::logging::LoggingHelper;

/// Read-mostly view over registered OAuth clients
#[derive(Clone)]
pub struct ClientRegistry {
    store: Arc<dyn ClientStore>,
    operation_timeout: Duration,
    hash_cost: u32,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn ClientStore>, operation_timeout: Duration, hash_cost: u32) -> Self {
        Self {
            store,
            operation_timeout,
            hash_cost,
        }
    }

    /// Whether `client_id` names a registered client
    ///
    /// Never fails: a malformed id, a missing client and a store failure all
    /// answer `false`.
    pub async fn exists(&self, client_id: &str) -> bool {
        let Ok(id) = Uuid::parse_str(client_id) else {
            debug!("Client id is not a UUID ({} chars)", client_id.len());
            return false;
        };
        match with_timeout(self.operation_timeout, self.store.client_exists(id)).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Client existence check failed for {id}: {e}");
                false
            }
        }
    }

    /// Fetch a client by id
    ///
    /// # Errors
    ///
    /// `UnknownClient` if it does not exist, `Store` if the store failed.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Client, ClientValidationError> {
        with_timeout(self.operation_timeout, self.store.get_client_by_id(id))
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ClientValidationError::UnknownClient,
                other => ClientValidationError::Store(other),
            })
    }

    /// Parse and fetch a client from a request parameter
    ///
    /// # Errors
    ///
    /// `UnknownClient` for a malformed or unregistered id.
    pub async fn resolve(&self, client_id: &str) -> Result<Client, ClientValidationError> {
        let id = Uuid::parse_str(client_id).map_err(|_| ClientValidationError::UnknownClient)?;
        self.get_by_id(id).await
    }

    /// Exact membership of `redirect_uri` in the client's registered set
    #[must_use]
    pub fn validate_redirect(client: &Client, redirect_uri: &str) -> bool {
        client.redirect_uris.contains(redirect_uri)
    }

    /// Check a base64url encoded secret against the stored bcrypt hash
    ///
    /// Bad encoding and a wrong secret both answer `false`.
    pub async fn validate_secret(&self, client: &Client, provided_secret: &str) -> bool {
        let Ok(decoded) =
            general_purpose::URL_SAFE_NO_PAD.decode(provided_secret.trim_end_matches('='))
        else {
            debug!("Client secret for {} is not valid base64url", client.id);
            return false;
        };

        let hash = client.client_secret_hash.clone();
        match tokio::task::spawn_blocking(move || bcrypt::verify(decoded, &hash)).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                warn!("Stored secret hash for client {} is unusable: {e}", client.id);
                false
            }
            Err(e) => {
                error!("Secret verification task failed: {e}");
                false
            }
        }
    }

    /// Register a new client and return it with its plaintext secret
    ///
    /// The secret is only ever returned here, base64url encoded. Only its
    /// bcrypt hash is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if a redirect URI is not an absolute URL, hashing
    /// fails, or the store rejects the insert.
    pub async fn register(
        &self,
        display_name: &str,
        redirect_uris: &[String],
        scopes: &[String],
        is_private: bool,
    ) -> Result<(Client, String), ConfigurationError> {
        let id = Uuid::new_v4();
        let invalid = |reason: String| ConfigurationError::InvalidClient {
            id: id.to_string(),
            reason,
        };

        let redirect_uris = parse_redirect_uris(redirect_uris).map_err(invalid)?;

        let secret = generate_client_secret();
        let cost = self.hash_cost;
        let secret_for_hash = secret.clone();
        let client_secret_hash =
            tokio::task::spawn_blocking(move || bcrypt::hash(secret_for_hash, cost))
                .await
                .map_err(|e| invalid(e.to_string()))?
                .map_err(|e| invalid(e.to_string()))?;

        let client = Client {
            id,
            display_name: display_name.to_string(),
            client_secret_hash,
            redirect_uris,
            scopes: scopes.iter().cloned().collect(),
            is_private,
        };
        self.insert(client.clone()).await?;

        LoggingHelper::log_client_seeded(&id.to_string(), client.redirect_uris.len());
        Ok((client, general_purpose::URL_SAFE_NO_PAD.encode(secret)))
    }

    /// Insert the `[[clients]]` registrations from settings
    ///
    /// # Errors
    ///
    /// Returns an error for the first entry with a bad id, missing hash or
    /// unparsable redirect URI.
    pub async fn seed(&self, entries: &[ClientSettings]) -> Result<usize, ConfigurationError> {
        for entry in entries {
            let invalid = |reason: String| ConfigurationError::InvalidClient {
                id: entry.id.clone(),
                reason,
            };
            let id = Uuid::parse_str(&entry.id).map_err(|e| invalid(e.to_string()))?;
            if entry.client_secret_hash.is_empty() {
                return Err(invalid("client_secret_hash is empty".to_string()));
            }
            let redirect_uris = parse_redirect_uris(&entry.redirect_uris).map_err(invalid)?;

            self.insert(Client {
                id,
                display_name: entry.display_name.clone(),
                client_secret_hash: entry.client_secret_hash.clone(),
                redirect_uris,
                scopes: entry.scopes.iter().cloned().collect(),
                is_private: entry.private,
            })
            .await?;
            LoggingHelper::log_client_seeded(&entry.id, entry.redirect_uris.len());
        }
        Ok(entries.len())
    }

    async fn insert(&self, client: Client) -> Result<(), ConfigurationError> {
        let id = client.id.to_string();
        with_timeout(self.operation_timeout, self.store.insert_client(client))
            .await
            .map_err(|e| ConfigurationError::InvalidClient {
                id,
                reason: e.to_string(),
            })
    }
}

fn parse_redirect_uris(uris: &[String]) -> Result<BTreeSet<String>, String> {
    if uris.is_empty() {
        return Err("at least one redirect uri is required".to_string());
    }
    uris.iter()
        .map(|uri| {
            url::Url::parse(uri)
                .map(|_| uri.clone())
                .map_err(|e| format!("invalid redirect uri {uri}: {e}"))
        })
        .collect()
}
