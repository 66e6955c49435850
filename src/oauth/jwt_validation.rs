// Provider ID token verification against a published JWKS
// Keys are cached per provider; an unknown `kid` forces a refetch

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use log::{debug, warn};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::errors::ProviderError;
use crate::utils::logging::LoggingHelper;

/// Allowed clock difference when checking `exp`
pub const CLOCK_SKEW_SECONDS: i64 = 60;

/// Minimum time between refetches triggered by an unknown `kid`
pub const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
    kid: Option<String>,
}

/// Claims read from a provider ID token
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    pub exp: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    #[serde(default)]
    email_verified: Option<serde_json::Value>,
}

impl IdTokenClaims {
    /// Providers send `email_verified` as a bool or as the string "true"
    #[must_use]
    pub fn email_verified(&self) -> bool {
        match &self.email_verified {
            Some(serde_json::Value::Bool(verified)) => *verified,
            Some(serde_json::Value::String(verified)) => verified.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    fn audiences(&self) -> Vec<&str> {
        match &self.aud {
            Some(serde_json::Value::String(aud)) => vec![aud.as_str()],
            Some(serde_json::Value::Array(values)) => {
                values.iter().filter_map(serde_json::Value::as_str).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKey {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

#[derive(Default)]
struct JwksCache {
    keys: HashMap<String, JsonWebKey>,
    last_updated: Option<Instant>,
    last_forced_refresh: Option<Instant>,
}

impl JwksCache {
    fn is_valid(&self, cache_duration: Duration) -> bool {
        self.last_updated
            .is_some_and(|updated| updated.elapsed() < cache_duration)
    }

    fn store_keys(&mut self, keys: Vec<JsonWebKey>) {
        self.keys = keys
            .into_iter()
            .filter_map(|key| key.kid.clone().map(|kid| (kid, key)))
            .collect();
        self.last_updated = Some(Instant::now());
    }

    /// Take the slot for a refetch outside the normal expiry, at most once
    /// per `MIN_FORCED_REFRESH_INTERVAL`
    fn claim_forced_refresh(&mut self) -> bool {
        let allowed = self
            .last_forced_refresh
            .map_or(true, |at| at.elapsed() >= MIN_FORCED_REFRESH_INTERVAL);
        if allowed {
            self.last_forced_refresh = Some(Instant::now());
        }
        allowed
    }
}

/// Verifies RS256 ID tokens issued by one provider
#[derive(Clone)]
pub struct JwtValidator {
    provider: String,
    jwks_uri: String,
    http: reqwest::Client,
    cache_duration: Duration,
    cache: Arc<RwLock<JwksCache>>,
}

impl JwtValidator {
    /// `cache_duration` of zero disables caching
    #[must_use]
    pub fn new(
        provider: &str,
        jwks_uri: String,
        http: reqwest::Client,
        cache_duration: Duration,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            jwks_uri,
            http,
            cache_duration,
            cache: Arc::new(RwLock::new(JwksCache::default())),
        }
    }

    /// Verify signature, expiry, audience and (when given) issuer
    ///
    /// # Errors
    ///
    /// Returns `TokenVerification` for a malformed token, an unsupported
    /// algorithm, an unknown `kid`, a bad signature, a failed claim check, or
    /// a JWKS fetch failure.
    pub async fn validate_id_token(
        &self,
        token: &str,
        expected_audience: &str,
        expected_issuers: &[&str],
    ) -> Result<IdTokenClaims, ProviderError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid("invalid JWT format"));
        }

        let header: JwtHeader = decode_segment(parts[0], "header")?;
        if header.alg != "RS256" {
            return Err(invalid(&format!("unsupported algorithm {}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| invalid("token header has no kid"))?;

        let key = self.get_public_key(&kid).await?;
        let signature = general_purpose::URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|e| invalid(&format!("invalid signature encoding: {e}")))?;
        verify_rsa_signature(
            format!("{}.{}", parts[0], parts[1]).as_bytes(),
            &signature,
            &key,
        )?;

        let claims: IdTokenClaims = decode_segment(parts[1], "claims")?;
        validate_claims(&claims, expected_audience, expected_issuers)?;

        debug!("✅ ID token verified for provider '{}'", self.provider);
        Ok(claims)
    }

    async fn get_public_key(&self, kid: &str) -> Result<JsonWebKey, ProviderError> {
        if !self.cache_duration.is_zero() {
            let cache_is_fresh = {
                let cache = self.cache.read().await;
                let fresh = cache.is_valid(self.cache_duration);
                if let Some(key) = cache.keys.get(kid).filter(|_| fresh) {
                    debug!("🎯 Found cached key '{kid}' for provider '{}'", self.provider);
                    return Ok(key.clone());
                }
                fresh
            };

            // Unknown kid on a fresh key set: the provider may have rotated keys
            if cache_is_fresh && !self.cache.write().await.claim_forced_refresh() {
                debug!(
                    "Unknown key '{kid}' for provider '{}', refetch throttled",
                    self.provider
                );
                return Err(invalid(&format!("unknown key id {kid}")));
            }
        }

        let keys = self.fetch_jwks().await?;
        let found = keys.iter().find(|key| key.kid.as_deref() == Some(kid)).cloned();

        if !self.cache_duration.is_zero() {
            let mut cache = self.cache.write().await;
            LoggingHelper::log_jwks_refresh(&self.provider, keys.len());
            cache.store_keys(keys);
        }

        found.ok_or_else(|| invalid(&format!("unknown key id {kid}")))
    }

    async fn fetch_jwks(&self) -> Result<Vec<JsonWebKey>, ProviderError> {
        debug!("Fetching JWKS for '{}' from {}", self.provider, self.jwks_uri);
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| invalid(&format!("failed to fetch JWKS: {e}")))?;

        if !response.status().is_success() {
            warn!(
                "JWKS request for '{}' failed with status {}",
                self.provider,
                response.status()
            );
            return Err(invalid(&format!(
                "JWKS request failed with status {}",
                response.status()
            )));
        }

        let set: JsonWebKeySet = response
            .json()
            .await
            .map_err(|e| invalid(&format!("failed to parse JWKS: {e}")))?;
        Ok(set.keys)
    }
}

fn invalid(reason: &str) -> ProviderError {
    ProviderError::TokenVerification(reason.to_string())
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, ProviderError> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| invalid(&format!("invalid {what} encoding: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| invalid(&format!("invalid {what} JSON: {e}")))
}

fn verify_rsa_signature(
    signing_input: &[u8],
    signature: &[u8],
    key: &JsonWebKey,
) -> Result<(), ProviderError> {
    if key.kty != "RSA" {
        return Err(invalid(&format!("unsupported key type {}", key.kty)));
    }
    let n = key.n.as_deref().ok_or_else(|| invalid("missing RSA modulus"))?;
    let e = key.e.as_deref().ok_or_else(|| invalid("missing RSA exponent"))?;

    let n_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|e| invalid(&format!("invalid modulus encoding: {e}")))?;
    let e_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|e| invalid(&format!("invalid exponent encoding: {e}")))?;

    let public_key = RsaPublicKey::new(
        BigUint::from_bytes_be(&n_bytes),
        BigUint::from_bytes_be(&e_bytes),
    )
    .map_err(|e| invalid(&format!("invalid RSA key: {e}")))?;

    let signature =
        Signature::try_from(signature).map_err(|_| invalid("signature verification failed"))?;
    VerifyingKey::<Sha256>::new(public_key)
        .verify(signing_input, &signature)
        .map_err(|_| invalid("signature verification failed"))
}

fn validate_claims(
    claims: &IdTokenClaims,
    expected_audience: &str,
    expected_issuers: &[&str],
) -> Result<(), ProviderError> {
    let now = Utc::now().timestamp();
    if now > claims.exp + CLOCK_SKEW_SECONDS {
        return Err(invalid("token has expired"));
    }

    if !claims.audiences().contains(&expected_audience) {
        return Err(invalid("audience does not match client id"));
    }

    if !expected_issuers.is_empty() {
        let issuer = claims.iss.as_deref().unwrap_or_default();
        if !expected_issuers.contains(&issuer) {
            return Err(invalid(&format!("unexpected issuer {issuer}")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: serde_json::Value) -> IdTokenClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_email_verified_variants() {
        let base = json!({"sub": "1", "exp": 0});
        assert!(!claims(base.clone()).email_verified());

        let mut with_bool = base.clone();
        with_bool["email_verified"] = json!(true);
        assert!(claims(with_bool).email_verified());

        let mut with_string = base;
        with_string["email_verified"] = json!("true");
        assert!(claims(with_string).email_verified());
    }

    #[test]
    fn test_audience_validation() {
        let exp = Utc::now().timestamp() + 600;
        let single = claims(json!({"sub": "1", "exp": exp, "aud": "client-a"}));
        assert!(validate_claims(&single, "client-a", &[]).is_ok());
        assert!(validate_claims(&single, "client-b", &[]).is_err());

        let many = claims(json!({"sub": "1", "exp": exp, "aud": ["x", "client-b"]}));
        assert!(validate_claims(&many, "client-b", &[]).is_ok());

        let none = claims(json!({"sub": "1", "exp": exp}));
        assert!(validate_claims(&none, "client-a", &[]).is_err());
    }

    #[test]
    fn test_expired_and_issuer() {
        let now = Utc::now().timestamp();
        let expired = claims(json!({"sub": "1", "exp": now - 3600, "aud": "c"}));
        assert!(validate_claims(&expired, "c", &[]).is_err());

        let fresh = claims(json!({
            "sub": "1", "exp": now + 600, "aud": "c", "iss": "https://accounts.google.com"
        }));
        assert!(validate_claims(&fresh, "c", &["https://accounts.google.com"]).is_ok());
        assert!(validate_claims(&fresh, "c", &["https://login.example"]).is_err());
    }

    #[test]
    fn test_cache_drops_keys_without_kid() {
        let mut cache = JwksCache::default();
        assert!(!cache.is_valid(Duration::from_secs(60)));

        cache.store_keys(vec![
            JsonWebKey {
                kty: "RSA".to_string(),
                kid: Some("a".to_string()),
                alg: None,
                key_use: None,
                n: None,
                e: None,
            },
            JsonWebKey {
                kty: "RSA".to_string(),
                kid: None,
                alg: None,
                key_use: None,
                n: None,
                e: None,
            },
        ]);
        assert_eq!(cache.keys.len(), 1);
        assert!(cache.is_valid(Duration::from_secs(60)));
        assert!(!cache.is_valid(Duration::ZERO));
    }

    #[test]
    fn test_forced_refresh_is_rate_limited() {
        let mut cache = JwksCache::default();
        assert!(cache.claim_forced_refresh());
        assert!(!cache.claim_forced_refresh());

        cache.store_keys(Vec::new());
        assert!(!cache.claim_forced_refresh());

        cache.last_forced_refresh = Instant::now().checked_sub(MIN_FORCED_REFRESH_INTERVAL);
        assert!(cache.claim_forced_refresh());
    }

    #[tokio::test]
    async fn test_malformed_tokens_rejected_without_fetch() {
        let validator = JwtValidator::new(
            "google",
            "http://127.0.0.1:9/never".to_string(),
            reqwest::Client::new(),
            Duration::from_secs(60),
        );
        assert!(validator.validate_id_token("a.b", "c", &[]).await.is_err());

        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","kid":"k"}"#);
        let token = format!("{header}.e30.c2ln");
        let err = validator.validate_id_token(&token, "c", &[]).await.unwrap_err();
        assert!(err.to_string().contains("unsupported algorithm"));
    }
}
