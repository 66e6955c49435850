//! Testing utilities for idgate
//!
//! Available to unit tests and, with the `testing` feature, to the
//! integration tests under `tests/`.
//!
//! ## Organization
//!
//! - [`fixtures`] - Key material, identities and a fully wired [`TestContext`]
//! - [`mock`] - A fake identity provider that counts calls
//! - [`stores`] - Instrumented and failing store implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idgate::testing::TestContext;
//!
//! let ctx = TestContext::new().await;
//! let app = test::init_service(
//!     App::new()
//!         .app_data(web::Data::new(ctx.state()))
//!         .configure(configure_services),
//! )
//! .await;
//! ```

pub mod fixtures;
pub mod mock;
pub mod stores;

pub use fixtures::{TestContext, TestFixtures};
pub use mock::MockProvider;
pub use stores::{CountingStore, DuplicateOnInsertStore, FailingStore, SlowStore};

/// Common test constants
pub mod constants {
    /// Name the mock provider registers under
    pub const MOCK_PROVIDER: &str = "mock";

    /// Authorization endpoint of the mock provider
    pub const MOCK_AUTHORIZE_URL: &str = "https://mock-idp.test/authorize";

    /// Default test email address
    pub const TEST_EMAIL: &str = "test@example.com";

    /// Default test user name
    pub const TEST_USER_NAME: &str = "Test User";

    /// Default test provider user ID
    pub const TEST_PROVIDER_ID: &str = "123456789";

    /// Redirect URI registered for the test client
    pub const TEST_REDIRECT_URI: &str = "https://app/cb";

    pub const TEST_COOKIE_NAME: &str = "idgate_session";

    pub const TEST_SESSION_SECRET: &str = "test-session-secret-for-idgate";
}
