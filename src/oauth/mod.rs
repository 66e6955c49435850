//! OAuth module
//!
//! Provider adapters, the provider registry and the login flow controller.

pub mod flow;
pub mod jwt_validation;
pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{ConfigurationError, ProviderError};
use crate::models::ExternalIdentity;
use crate::settings::Settings;
use crate::utils::logging::LoggingHelper;

pub use flow::{
    CallbackOutcome, FlowStage, LoginRedirect, LoginRequest, OAuthFlowController,
    TokenExchangeRequest,
};
pub use jwt_validation::JwtValidator;
pub use providers::build_provider;

/// One external identity provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short provider name used in paths, e.g. `google`
    fn name(&self) -> &str;

    /// Authorization URL the user agent is sent to, carrying `state`
    ///
    /// # Errors
    ///
    /// Returns an error if the configured endpoint cannot be parsed.
    fn authorization_url(&self, state: &str) -> Result<String, ProviderError>;

    /// Exchange an authorization code for an access token
    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError>;

    /// Resolve the authenticated identity behind an access token
    async fn fetch_identity(&self, access_token: &str) -> Result<ExternalIdentity, ProviderError>;

    /// Verify a provider-issued ID token and return its identity
    async fn verify_bearer_token(&self, token: &str) -> Result<ExternalIdentity, ProviderError>;
}

/// Query parameters delivered to `/callback/{provider}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Enabled providers by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Look up a provider
    ///
    /// # Errors
    ///
    /// `UnknownProvider` if none is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    /// Registered provider names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Build adapters for every enabled provider in settings
    ///
    /// A provider with missing credentials is skipped with a warning. An
    /// unsupported provider name is a configuration error.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or a provider name
    /// is not supported.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigurationError> {
        LoggingHelper::log_provider_initialization();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(settings.http.connect_timeout_seconds))
            .build()
            .map_err(|e| ConfigurationError::Other(format!("failed to build HTTP client: {e}")))?;
        let jwks_cache = Duration::from_secs(settings.jwks.cache_duration_seconds);

        let mut registry = Self::new();
        for provider in &settings.providers {
            let display_name = provider.display_name.as_deref().unwrap_or(&provider.name);
            if !provider.enabled {
                LoggingHelper::log_provider_disabled(&provider.name);
                continue;
            }
            match build_provider(
                provider,
                settings.callback_url(&provider.name),
                http.clone(),
                jwks_cache,
            ) {
                Ok(adapter) => {
                    LoggingHelper::log_provider_configured(display_name, &provider.name);
                    registry.register(adapter);
                }
                Err(e @ ConfigurationError::MissingProviderField { .. }) => {
                    LoggingHelper::log_provider_not_configured(display_name, &e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        LoggingHelper::log_providers_summary(&registry.names());
        Ok(registry)
    }
}
