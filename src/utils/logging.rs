// Centralized logging for the notable events of a login flow
//
// Secrets never reach the log. Tokens, client secrets and authorization codes
// are reported by length only.
use log::{debug, error, info, warn};

use crate::oauth::flow::FlowStage;

/// Initialize `env_logger`, with `RUST_LOG` taking precedence over `level`
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        debug!("Logger already initialized");
    }
}

pub struct LoggingHelper;

impl LoggingHelper {
    pub fn log_provider_initialization() {
        info!("🔧 Initializing OAuth providers from configuration...");
    }

    pub fn log_provider_disabled(provider_name: &str) {
        info!("⏭️  Provider {provider_name} is disabled, skipping");
    }

    pub fn log_provider_configured(display_name: &str, provider_name: &str) {
        info!("✅ {display_name} OAuth2 configured ({provider_name})");
    }

    pub fn log_provider_not_configured(display_name: &str, reason: &str) {
        warn!("❌ {display_name} OAuth2 not configured: {reason}");
    }

    pub fn log_providers_summary(provider_names: &[&str]) {
        info!("🎯 Configured OAuth providers: {provider_names:?}");
    }

    pub fn log_client_seeded(client_id: &str, redirect_count: usize) {
        info!("📋 Registered client {client_id} with {redirect_count} redirect URI(s)");
    }

    pub fn log_login_redirect(provider: &str, client_id: &str, state_len: usize) {
        info!("🔍 Redirecting client {client_id} to {provider} (state nonce {state_len} chars)");
    }

    pub fn log_state_mismatch(provider: &str, request_id: &str) {
        warn!("🚨 [{request_id}] OAuth state mismatch on {provider} callback, aborting flow");
    }

    pub fn log_token_exchange_start(provider: &str, code_len: usize) {
        info!("🔄 Exchanging authorization code ({code_len} chars) with {provider}");
    }

    pub fn log_token_exchange_failure(provider: &str, reason: &str) {
        warn!("Code exchange with {provider} failed: {reason}");
    }

    pub fn log_identity_fetched(provider: &str, provider_user_id: &str, email_verified: bool) {
        debug!(
            "Fetched {provider} identity {provider_user_id} (email verified: {email_verified})"
        );
    }

    pub fn log_user_created(user_id: &str, provider: &str) {
        info!("👤 Created user {user_id} for first {provider} login");
    }

    pub fn log_token_issued(user_id: &str, token_len: usize) {
        info!("🎫 Issued token for user {user_id} ({token_len} bytes)");
    }

    pub fn log_jwks_refresh(provider: &str, key_count: usize) {
        debug!("💾 Cached {key_count} signing keys for provider '{provider}'");
    }

    /// Log a failed flow. Server-side failures keep full detail here only.
    pub fn log_flow_failure(
        request_id: &str,
        stage: FlowStage,
        err: &crate::errors::FlowError,
    ) {
        if err.status_code().is_server_error() {
            error!("[{request_id}] Flow failed at {stage}: {err:?}");
        } else {
            warn!("[{request_id}] Flow rejected at {stage}: {err}");
        }
    }
}
