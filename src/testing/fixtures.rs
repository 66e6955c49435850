//! Test fixtures providing pre-built test objects
//!
//! Keys come from `tests/fixtures/`. [`TestContext`] wires a complete gateway
//! around an in-memory store and the [`MockProvider`].

use std::sync::Arc;
use std::time::Duration;

use crate::clients::ClientRegistry;
use crate::handlers::GatewayState;
use crate::keys::KeyManager;
use crate::models::{Client, ExternalIdentity};
use crate::oauth::{OAuthFlowController, ProviderRegistry};
use crate::session::SessionManager;
use crate::token::TokenService;
use crate::users::UserDirectory;

use super::constants::{TEST_COOKIE_NAME, TEST_EMAIL, TEST_REDIRECT_URI, TEST_SESSION_SECRET};
use super::mock::MockProvider;
use super::stores::CountingStore;

/// Cheapest bcrypt cost, for speed
pub const TEST_HASH_COST: u32 = 4;

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Absolute path of a file under `tests/fixtures/`
    #[must_use]
    pub fn fixture_path(name: &str) -> String {
        format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
    }

    /// Contents of a file under `tests/fixtures/`
    ///
    /// # Panics
    ///
    /// Panics if the fixture is missing.
    #[must_use]
    pub fn read_fixture(name: &str) -> String {
        std::fs::read_to_string(Self::fixture_path(name)).expect("fixture file")
    }

    /// Key manager over the gateway fixture keypair
    ///
    /// # Panics
    ///
    /// Panics if the fixture keys cannot be loaded.
    #[must_use]
    pub fn key_manager() -> KeyManager {
        KeyManager::load(
            Self::fixture_path("jwt-privatekey"),
            Self::fixture_path("jwt-publickey"),
        )
        .expect("fixture keys")
    }

    #[must_use]
    pub fn token_service() -> TokenService {
        TokenService::new(Self::key_manager())
    }

    #[must_use]
    pub fn session_manager() -> SessionManager {
        SessionManager::new(TEST_SESSION_SECRET, TEST_COOKIE_NAME, false, 3600)
    }

    /// Verified identity for `provider` / `external_id`
    #[must_use]
    pub fn identity(provider: &str, external_id: &str) -> ExternalIdentity {
        ExternalIdentity::new(
            provider,
            external_id.to_string(),
            format!("User {external_id}"),
            Some(TEST_EMAIL.to_string()),
            true,
        )
    }
}

/// A fully wired gateway with one registered client
pub struct TestContext {
    pub flow: OAuthFlowController,
    pub clients: ClientRegistry,
    pub users: UserDirectory,
    pub tokens: TokenService,
    pub sessions: SessionManager,
    pub provider: Arc<MockProvider>,
    pub store: CountingStore,
    pub client: Client,
    /// Plaintext secret of `client`, base64url encoded
    pub client_secret: String,
}

impl TestContext {
    pub const REDIRECT_URI: &'static str = TEST_REDIRECT_URI;

    /// Context with only the mock provider registered
    pub async fn new() -> Self {
        Self::with_providers(ProviderRegistry::new()).await
    }

    /// Context with `providers` plus the mock provider
    ///
    /// # Panics
    ///
    /// Panics if the test client cannot be registered.
    pub async fn with_providers(mut providers: ProviderRegistry) -> Self {
        let store = CountingStore::new();
        let timeout = Duration::from_secs(5);
        let clients = ClientRegistry::new(Arc::new(store.clone()), timeout, TEST_HASH_COST);
        let users = UserDirectory::new(Arc::new(store.clone()), timeout);
        let tokens = TestFixtures::token_service();

        let provider = Arc::new(MockProvider::new());
        providers.register(provider.clone());

        let (client, client_secret) = clients
            .register(
                "Test App",
                &[Self::REDIRECT_URI.to_string()],
                &["openid".to_string()],
                true,
            )
            .await
            .expect("test client registration");

        let flow =
            OAuthFlowController::new(providers, clients.clone(), users.clone(), tokens.clone());

        Self {
            flow,
            clients,
            users,
            tokens,
            sessions: TestFixtures::session_manager(),
            provider,
            store,
            client,
            client_secret,
        }
    }

    /// Handler state over this context
    #[must_use]
    pub fn state(&self) -> GatewayState {
        GatewayState {
            flow: self.flow.clone(),
            sessions: self.sessions.clone(),
            tokens: self.tokens.clone(),
            users: self.users.clone(),
        }
    }
}
