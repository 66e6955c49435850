#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the idgate application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod clients;
pub mod errors;
pub mod handlers;
pub mod keys;
pub mod models;
pub mod oauth;
pub mod session;
pub mod settings;
pub mod store;
pub mod token;
pub mod users;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use clients::ClientRegistry;
pub use errors::FlowError;
pub use handlers::{configure_services, GatewayState};
pub use keys::KeyManager;
pub use oauth::{OAuthFlowController, ProviderRegistry};
pub use session::SessionManager;
pub use settings::Settings;
pub use token::TokenService;
pub use users::UserDirectory;
