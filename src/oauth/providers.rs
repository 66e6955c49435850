//! Provider-specific OAuth logic
//!
//! Google and Microsoft share one HTTP shape ([`ProviderClient`]) and differ
//! in endpoints, user-info payloads and ID token issuers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::jwt_validation::{IdTokenClaims, JwtValidator};
use super::ProviderAdapter;
use crate::errors::{ConfigurationError, ProviderError};
use crate::models::ExternalIdentity;
use crate::settings::ProviderSettings;
use crate::utils::logging::LoggingHelper;

pub const GOOGLE: &str = "google";
pub const MICROSOFT: &str = "microsoft";

const GOOGLE_ISSUERS: &[&str] = &["https://accounts.google.com", "accounts.google.com"];

/// Endpoint set for one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorization: String,
    pub token: String,
    pub userinfo: String,
    pub jwks: String,
}

impl ProviderEndpoints {
    /// Well-known endpoints for a supported provider
    #[must_use]
    pub fn defaults_for(name: &str) -> Option<Self> {
        match name {
            GOOGLE => Some(Self {
                authorization: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token: "https://oauth2.googleapis.com/token".to_string(),
                userinfo: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
                jwks: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
            }),
            MICROSOFT => Some(Self {
                authorization: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
                    .to_string(),
                token: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
                userinfo: "https://graph.microsoft.com/oidc/userinfo".to_string(),
                jwks: "https://login.microsoftonline.com/common/discovery/v2.0/keys".to_string(),
            }),
            _ => None,
        }
    }

    fn with_overrides(mut self, settings: &ProviderSettings) -> Self {
        if let Some(url) = &settings.authorization_endpoint {
            self.authorization.clone_from(url);
        }
        if let Some(url) = &settings.token_endpoint {
            self.token.clone_from(url);
        }
        if let Some(url) = &settings.userinfo_endpoint {
            self.userinfo.clone_from(url);
        }
        if let Some(url) = &settings.jwks_uri {
            self.jwks.clone_from(url);
        }
        self
    }
}

/// Resolved configuration for one provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub display_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub endpoints: ProviderEndpoints,
    pub extra_auth_params: HashMap<String, String>,
}

impl ProviderConfig {
    /// Resolve settings (with env overrides) into a usable configuration
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported provider name or missing credentials.
    pub fn from_settings(
        settings: &ProviderSettings,
        redirect_uri: String,
    ) -> Result<Self, ConfigurationError> {
        let endpoints = ProviderEndpoints::defaults_for(&settings.name)
            .ok_or_else(|| ConfigurationError::UnsupportedProvider(settings.name.clone()))?
            .with_overrides(settings);

        let client_id = settings.get_client_id().filter(|id| !id.is_empty()).ok_or_else(|| {
            ConfigurationError::MissingProviderField {
                provider: settings.name.clone(),
                field: "client_id",
            }
        })?;
        let client_secret = settings
            .get_client_secret()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| ConfigurationError::MissingProviderField {
                provider: settings.name.clone(),
                field: "client_secret",
            })?;

        Ok(Self {
            name: settings.name.clone(),
            display_name: settings
                .display_name
                .clone()
                .unwrap_or_else(|| settings.name.clone()),
            client_id,
            client_secret,
            redirect_uri,
            scopes: settings.scopes.clone(),
            endpoints,
            extra_auth_params: settings.extra_auth_params.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// HTTP plumbing shared by all providers
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    http: reqwest::Client,
    validator: JwtValidator,
}

impl ProviderClient {
    #[must_use]
    pub fn new(
        config: ProviderConfig,
        http: reqwest::Client,
        jwks_cache_duration: Duration,
    ) -> Self {
        let validator = JwtValidator::new(
            &config.name,
            config.endpoints.jwks.clone(),
            http.clone(),
            jwks_cache_duration,
        );
        Self {
            config,
            http,
            validator,
        }
    }

    /// Authorization URL carrying `client_id`, `scope`, `redirect_uri`,
    /// `response_type=code` and `state`
    ///
    /// # Errors
    ///
    /// Returns an error if the configured authorization endpoint is not a URL.
    pub fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        let mut url = url::Url::parse(&self.config.endpoints.authorization)
            .map_err(|e| ProviderError::AuthorizationUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &self.config.scopes.join(" "))
                .append_pair("state", state);
            let mut extra: Vec<_> = self.config.extra_auth_params.iter().collect();
            extra.sort();
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    /// POST the authorization code to the token endpoint and return the access token
    ///
    /// # Errors
    ///
    /// `CodeExchange` on network failure, a non-success status, a provider
    /// error payload, or a response without an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        LoggingHelper::log_token_exchange_start(&self.config.name, code.len());

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&self.config.endpoints.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| self.exchange_failed(format!("request failed: {e}")))?;

        let status = response.status();
        let body: Option<TokenResponse> = response.json().await.ok();

        if !status.is_success() {
            let detail = body
                .and_then(|b| b.error.map(|e| format_provider_error(&e, b.error_description)))
                .unwrap_or_else(|| "no error detail".to_string());
            return Err(self.exchange_failed(format!("status {status}: {detail}")));
        }

        match body {
            Some(TokenResponse {
                access_token: Some(token),
                ..
            }) if !token.is_empty() => Ok(token),
            Some(TokenResponse {
                error: Some(error),
                error_description,
                ..
            }) => Err(self.exchange_failed(format_provider_error(&error, error_description))),
            _ => Err(self.exchange_failed("response carried no access token".to_string())),
        }
    }

    fn exchange_failed(&self, reason: String) -> ProviderError {
        LoggingHelper::log_token_exchange_failure(&self.config.name, &reason);
        ProviderError::CodeExchange(reason)
    }

    /// GET the user-info endpoint with the access token as bearer
    ///
    /// # Errors
    ///
    /// `IdentityFetch` on network failure, a non-success status or an
    /// unexpected payload.
    pub async fn fetch_userinfo<T: DeserializeOwned>(
        &self,
        access_token: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(&self.config.endpoints.userinfo)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::IdentityFetch(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::IdentityFetch(format!(
                "user-info request failed with status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::IdentityFetch(format!("invalid user-info payload: {e}")))
    }

    /// Verify a provider-issued ID token against the provider's JWKS
    ///
    /// # Errors
    ///
    /// `TokenVerification` on any validation failure.
    pub async fn verify_id_token(
        &self,
        token: &str,
        expected_issuers: &[&str],
    ) -> Result<IdTokenClaims, ProviderError> {
        self.validator
            .validate_id_token(token, &self.config.client_id, expected_issuers)
            .await
    }
}

fn format_provider_error(error: &str, description: Option<String>) -> String {
    match description {
        Some(description) => format!("{error} ({description})"),
        None => error.to_string(),
    }
}

fn display_name_or(name: Option<String>, fallback: &str) -> String {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn identity_from_claims(provider: &str, claims: IdTokenClaims) -> ExternalIdentity {
    let verified = claims.email_verified();
    let display_name = display_name_or(
        claims.name.clone().or_else(|| claims.preferred_username.clone()),
        &claims.sub,
    );
    ExternalIdentity::new(provider, claims.sub, display_name, claims.email, verified)
}

/// Google user-info (v2) payload. `sub`/`email_verified` are accepted for the OIDC shape.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    #[serde(alias = "sub")]
    id: String,
    name: Option<String>,
    email: Option<String>,
    #[serde(alias = "email_verified", default)]
    verified_email: bool,
}

pub struct GoogleProvider {
    client: ProviderClient,
}

impl GoogleProvider {
    #[must_use]
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleProvider {
    fn name(&self) -> &str {
        GOOGLE
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        self.client.authorization_url(state)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        self.client.exchange_code(code).await
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ExternalIdentity, ProviderError> {
        let info: GoogleUserInfo = self.client.fetch_userinfo(access_token).await?;
        if info.id.is_empty() {
            return Err(ProviderError::IdentityFetch("user-info has no id".to_string()));
        }
        let display_name = display_name_or(info.name, &info.id);
        LoggingHelper::log_identity_fetched(GOOGLE, &info.id, info.verified_email);
        Ok(ExternalIdentity::new(
            GOOGLE,
            info.id,
            display_name,
            info.email,
            info.verified_email,
        ))
    }

    async fn verify_bearer_token(&self, token: &str) -> Result<ExternalIdentity, ProviderError> {
        let claims = self.client.verify_id_token(token, GOOGLE_ISSUERS).await?;
        Ok(identity_from_claims(GOOGLE, claims))
    }
}

/// Microsoft OIDC user-info payload. Without `email_verified` the email is untrusted.
#[derive(Debug, Deserialize)]
struct MicrosoftUserInfo {
    sub: String,
    name: Option<String>,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

pub struct MicrosoftProvider {
    client: ProviderClient,
}

impl MicrosoftProvider {
    #[must_use]
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftProvider {
    fn name(&self) -> &str {
        MICROSOFT
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        self.client.authorization_url(state)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        self.client.exchange_code(code).await
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ExternalIdentity, ProviderError> {
        let info: MicrosoftUserInfo = self.client.fetch_userinfo(access_token).await?;
        if info.sub.is_empty() {
            return Err(ProviderError::IdentityFetch("user-info has no sub".to_string()));
        }
        let display_name = display_name_or(info.name, &info.sub);
        LoggingHelper::log_identity_fetched(MICROSOFT, &info.sub, info.email_verified);
        Ok(ExternalIdentity::new(
            MICROSOFT,
            info.sub,
            display_name,
            info.email,
            info.email_verified,
        ))
    }

    // Issuer is tenant specific under /common, so only audience and signature are checked
    async fn verify_bearer_token(&self, token: &str) -> Result<ExternalIdentity, ProviderError> {
        let claims = self.client.verify_id_token(token, &[]).await?;
        Ok(identity_from_claims(MICROSOFT, claims))
    }
}

/// Build the adapter for a configured provider
///
/// # Errors
///
/// Returns an error for an unsupported provider or missing credentials.
pub fn build_provider(
    settings: &ProviderSettings,
    redirect_uri: String,
    http: reqwest::Client,
    jwks_cache_duration: Duration,
) -> Result<Arc<dyn ProviderAdapter>, ConfigurationError> {
    let config = ProviderConfig::from_settings(settings, redirect_uri)?;
    let client = ProviderClient::new(config, http, jwks_cache_duration);
    match settings.name.as_str() {
        GOOGLE => Ok(Arc::new(GoogleProvider::new(client))),
        MICROSOFT => Ok(Arc::new(MicrosoftProvider::new(client))),
        other => Err(ConfigurationError::UnsupportedProvider(other.to_string())),
    }
}
