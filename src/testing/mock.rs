//! Fake identity provider for flow and handler tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::models::ExternalIdentity;
use crate::oauth::ProviderAdapter;

use super::constants::{
    MOCK_AUTHORIZE_URL, MOCK_PROVIDER, TEST_EMAIL, TEST_PROVIDER_ID, TEST_USER_NAME,
};

/// Provider named `mock` that returns a fixed identity and counts calls
pub struct MockProvider {
    identity: Mutex<ExternalIdentity>,
    exchange_calls: AtomicUsize,
    identity_calls: AtomicUsize,
    fail_exchange: AtomicBool,
    fail_verification: AtomicBool,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_identity(ExternalIdentity::new(
            MOCK_PROVIDER,
            TEST_PROVIDER_ID.to_string(),
            TEST_USER_NAME.to_string(),
            Some(TEST_EMAIL.to_string()),
            true,
        ))
    }

    #[must_use]
    pub fn with_identity(identity: ExternalIdentity) -> Self {
        Self {
            identity: Mutex::new(identity),
            exchange_calls: AtomicUsize::new(0),
            identity_calls: AtomicUsize::new(0),
            fail_exchange: AtomicBool::new(false),
            fail_verification: AtomicBool::new(false),
        }
    }

    /// Identity returned for subsequent logins
    ///
    /// # Panics
    ///
    /// Panics if the identity lock is poisoned.
    pub fn set_identity(&self, identity: ExternalIdentity) {
        *self.identity.lock().unwrap() = identity;
    }

    /// Make every later code exchange fail
    pub fn fail_exchange(&self) {
        self.fail_exchange.store(true, Ordering::SeqCst);
    }

    /// Make every later bearer token verification fail
    pub fn fail_verification(&self) {
        self.fail_verification.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    fn current_identity(&self) -> Result<ExternalIdentity, ProviderError> {
        self.identity
            .lock()
            .map(|identity| identity.clone())
            .map_err(|e| ProviderError::IdentityFetch(e.to_string()))
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        MOCK_PROVIDER
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        let mut url = url::Url::parse(MOCK_AUTHORIZE_URL)
            .map_err(|e| ProviderError::AuthorizationUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("state", state);
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(ProviderError::CodeExchange("invalid_grant".to_string()));
        }
        Ok(format!("access-token-for-{code}"))
    }

    async fn fetch_identity(&self, _access_token: &str) -> Result<ExternalIdentity, ProviderError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        self.current_identity()
    }

    async fn verify_bearer_token(&self, _token: &str) -> Result<ExternalIdentity, ProviderError> {
        if self.fail_verification.load(Ordering::SeqCst) {
            return Err(ProviderError::TokenVerification("unknown kid".to_string()));
        }
        self.current_identity()
    }
}
