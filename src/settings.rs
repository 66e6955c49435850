use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::errors::ConfigurationError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub keys: KeySettings,
    pub session: SessionSettings,
    pub cookies: CookieSettings,
    pub http: HttpSettings,
    pub storage: StorageSettings,
    pub jwks: JwksSettings,
    pub logging: LoggingSettings,
    pub providers: Vec<ProviderSettings>,
    pub clients: Vec<ClientSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public base URL of this gateway; provider callbacks are `{base}/callback/{provider}`
    pub redirect_base_url: String,
    pub cors_origins: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    pub private_key_path: String,
    pub public_key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub cookie_name: String,
    pub session_secret: String,
    /// Cookie `Max-Age`; an abandoned login expires with it
    pub max_age_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub request_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub operation_timeout_seconds: u64,
    pub secret_hash_cost: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksSettings {
    /// 0 disables caching: every verification fetches the key set
    pub cache_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub display_name: Option<String>,
    pub enabled: bool,
    pub scopes: Vec<String>,

    // Endpoint overrides, the adapter supplies the well-known defaults
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    pub extra_auth_params: Option<HashMap<String, String>>,
}

/// Client registration seeded into the client store at startup
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientSettings {
    pub id: String,
    pub display_name: String,
    pub client_secret_hash: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub private: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redirect_base_url: "http://localhost:8080".to_string(),
            cors_origins: "http://localhost:3000,http://localhost:8080".to_string(),
        }
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            private_key_path: "keys/jwt-privatekey".to_string(),
            public_key_path: "keys/jwt-publickey".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "idgate_session".to_string(),
            session_secret: String::new(), // Will be generated if empty
            max_age_seconds: 3600,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self { secure: true }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            connect_timeout_seconds: 5,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            operation_timeout_seconds: 5,
            secret_hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for JwksSettings {
    fn default() -> Self {
        Self {
            cache_duration_seconds: 3600,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: None,
            enabled: true,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            jwks_uri: None,
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            extra_auth_params: None,
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Settings.toml in `IDGATE_CONFIG_DIR` (if set and exists)
    /// 3. Settings.toml in the current directory
    /// 4. Defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigurationError> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        Ok(settings)
    }

    fn load_base_settings() -> Result<Self, ConfigurationError> {
        let mut settings = Self::default();

        let default_config_path = Path::new("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(config_dir) = std::env::var("IDGATE_CONFIG_DIR") {
            let override_path = Path::new(&config_dir).join("Settings.toml");
            if override_path.exists() {
                settings = Self::from_file(&override_path)?;
                println!("✓ Overriding settings from {}", override_path.display());
            } else {
                println!(
                    "ℹ IDGATE_CONFIG_DIR set but no Settings.toml found at: {}",
                    override_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a TOML settings file without applying environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigurationError::SettingsFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        basic_toml::from_str(&content).map_err(|e| ConfigurationError::SettingsFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_key_env_overrides(&mut settings.keys);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_http_env_overrides(&mut settings.http);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(redirect_base_url) = std::env::var("REDIRECT_BASE_URL") {
            app_settings.redirect_base_url = redirect_base_url;
        }
        if let Ok(cors_origins) = std::env::var("CORS_ORIGINS") {
            app_settings.cors_origins = cors_origins;
        }
    }

    fn apply_key_env_overrides(key_settings: &mut KeySettings) {
        if let Ok(path) = std::env::var("PRIVATE_KEY_PATH") {
            key_settings.private_key_path = path;
        }
        if let Ok(path) = std::env::var("PUBLIC_KEY_PATH") {
            key_settings.public_key_path = path;
        }
    }

    /// Apply environment overrides for session settings
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) {
        if let Ok(cookie_name) = std::env::var("SESSION_COOKIE_NAME") {
            if !cookie_name.is_empty() {
                session_settings.cookie_name = cookie_name;
            }
        }
        Self::apply_numeric_env_override(
            "SESSION_MAX_AGE_SECONDS",
            &mut session_settings.max_age_seconds,
        );
        Self::handle_session_secret_override(session_settings);
    }

    fn apply_http_env_overrides(http_settings: &mut HttpSettings) {
        Self::apply_numeric_env_override(
            "HTTP_REQUEST_TIMEOUT_SECONDS",
            &mut http_settings.request_timeout_seconds,
        );
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    fn handle_session_secret_override(session_settings: &mut SessionSettings) {
        let env_secret_set = std::env::var("SESSION_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                session_settings.session_secret = secret;
                true
            }
        });

        if !env_secret_set && session_settings.session_secret.is_empty() {
            session_settings.session_secret = Self::generate_random_session_secret();
            Self::warn_about_generated_secret();
        }
    }

    fn generate_random_session_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated session secret");
        eprintln!("🔒 For production use, set the SESSION_SECRET environment variable");
        eprintln!("   or configure session_secret in Settings.toml");
        eprintln!("💡 Sessions will not survive a restart unless the secret is configured");
    }

    fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                cookie_settings.secure = cookie_secure;
            }
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    #[must_use]
    pub fn get_cors_origins(&self) -> Vec<String> {
        self.application
            .cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Callback URL registered with the named provider
    #[must_use]
    pub fn callback_url(&self, provider: &str) -> String {
        format!(
            "{}/callback/{provider}",
            self.application.redirect_base_url.trim_end_matches('/')
        )
    }
}

impl ProviderSettings {
    /// Client ID from `client_id_env` (default `<NAME>_CLIENT_ID`), else the direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        let env_var = self
            .client_id_env
            .clone()
            .unwrap_or_else(|| format!("{}_CLIENT_ID", self.name.to_uppercase()));
        std::env::var(env_var)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| self.client_id.clone())
    }

    /// Client secret from `client_secret_env` (default `<NAME>_CLIENT_SECRET`),
    /// else the direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        let env_var = self
            .client_secret_env
            .clone()
            .unwrap_or_else(|| format!("{}_CLIENT_SECRET", self.name.to_uppercase()));
        std::env::var(env_var)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| self.client_secret.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clean_env_vars() {
        for var in [
            "SESSION_SECRET",
            "SESSION_COOKIE_NAME",
            "SESSION_MAX_AGE_SECONDS",
            "PRIVATE_KEY_PATH",
            "PUBLIC_KEY_PATH",
            "IDGATE_CONFIG_DIR",
            "GOOGLE_CLIENT_ID",
            "GOOGLE_CLIENT_SECRET",
            "CUSTOM_GOOGLE_ID",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.session.session_secret, "");
        assert_eq!(settings.session.max_age_seconds, 3600);
        assert_eq!(settings.jwks.cache_duration_seconds, 3600);
        assert!(settings.cookies.secure);
        assert_eq!(
            settings.callback_url("google"),
            "http://localhost:8080/callback/google"
        );
    }

    #[test]
    fn test_parse_toml_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
port = 9090
redirect_base_url = "https://id.example.com/"

[[providers]]
name = "google"
client_id = "toml-id"

[[clients]]
id = "0b9f5a44-4c0e-4c3b-9a3c-0d4b3a4d6a11"
display_name = "Demo"
client_secret_hash = "$2b$04$abc"
redirect_uris = ["https://app/cb"]
"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.application.port, 9090);
        assert_eq!(settings.application.host, "0.0.0.0");
        assert_eq!(
            settings.callback_url("google"),
            "https://id.example.com/callback/google"
        );
        assert_eq!(settings.providers.len(), 1);
        assert!(settings.providers[0].enabled);
        assert_eq!(settings.clients[0].redirect_uris, vec!["https://app/cb"]);
        assert!(!settings.clients[0].private);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[application\nport = ").unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(ConfigurationError::SettingsFile { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clean_env_vars();
        std::env::set_var("PRIVATE_KEY_PATH", "/run/keys/private.pem");
        std::env::set_var("SESSION_COOKIE_NAME", "gw");
        std::env::set_var("SESSION_MAX_AGE_SECONDS", "600");
        std::env::set_var("SESSION_SECRET", "env-secret");

        let mut settings = Settings::default();
        Settings::apply_env_overrides(&mut settings);

        assert_eq!(settings.keys.private_key_path, "/run/keys/private.pem");
        assert_eq!(settings.keys.public_key_path, "keys/jwt-publickey");
        assert_eq!(settings.session.cookie_name, "gw");
        assert_eq!(settings.session.max_age_seconds, 600);
        assert_eq!(settings.session.session_secret, "env-secret");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_session_secret_auto_generation() {
        clean_env_vars();

        let mut first = SessionSettings::default();
        Settings::apply_session_env_overrides(&mut first);
        let mut second = SessionSettings::default();
        Settings::apply_session_env_overrides(&mut second);

        assert!(first.session_secret.len() > 40);
        assert_ne!(first.session_secret, second.session_secret);
    }

    #[test]
    #[serial]
    fn test_provider_credentials_from_env() {
        clean_env_vars();
        let provider = ProviderSettings {
            name: "google".to_string(),
            client_id: Some("toml-id".to_string()),
            client_secret: Some("toml-secret".to_string()),
            ..Default::default()
        };
        assert_eq!(provider.get_client_id().as_deref(), Some("toml-id"));

        std::env::set_var("GOOGLE_CLIENT_ID", "env-id");
        std::env::set_var("GOOGLE_CLIENT_SECRET", "env-secret");
        assert_eq!(provider.get_client_id().as_deref(), Some("env-id"));
        assert_eq!(provider.get_client_secret().as_deref(), Some("env-secret"));

        let custom = ProviderSettings {
            client_id_env: Some("CUSTOM_GOOGLE_ID".to_string()),
            ..provider
        };
        std::env::set_var("CUSTOM_GOOGLE_ID", "custom-id");
        assert_eq!(custom.get_client_id().as_deref(), Some("custom-id"));

        clean_env_vars();
    }
}
