use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::TokenError;
use crate::keys::KeyManager;
use crate::models::{SignedToken, User};

/// Lifetime of every issued token
pub const TOKEN_TTL_SECONDS: i64 = 3600;

/// Claims carried by a gateway token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: String,
    pub uid: Uuid,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
}

/// Issues and verifies RS256 bearer tokens for local users.
///
/// Tokens are stateless: anything that verifies against the public key and
/// has not expired is trusted.
#[derive(Clone, Debug)]
pub struct TokenService {
    keys: KeyManager,
}

impl TokenService {
    #[must_use]
    pub fn new(keys: KeyManager) -> Self {
        Self { keys }
    }

    /// Issue a token for `user`, valid for one hour from now
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if serialization or signing fails.
    pub fn issue(&self, user: &User) -> Result<SignedToken, TokenError> {
        self.issue_at(user, Utc::now())
    }

    /// Issue a token as if the current time were `now`
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if serialization or signing fails.
    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<SignedToken, TokenError> {
        let iat = now.timestamp();
        let claims = TokenClaims {
            sub: user.id.to_string(),
            uid: user.id,
            name: user.display_name.clone(),
            iat,
            exp: iat + TOKEN_TTL_SECONDS,
        };
        let header = json!({
            "alg": "RS256",
            "typ": "JWT",
            "kid": self.keys.key_id(),
        });

        let header_json =
            serde_json::to_vec(&header).map_err(|e| TokenError::Signing(e.to_string()))?;
        let claims_json =
            serde_json::to_vec(&claims).map_err(|e| TokenError::Signing(e.to_string()))?;

        let header_b64 = general_purpose::URL_SAFE_NO_PAD.encode(header_json);
        let claims_b64 = general_purpose::URL_SAFE_NO_PAD.encode(claims_json);
        let message = format!("{header_b64}.{claims_b64}");

        let signature = self.keys.sign(message.as_bytes())?;
        let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        debug!("Issued token for user {} (exp {})", user.id, claims.exp);
        Ok(SignedToken::new(format!("{message}.{signature_b64}")))
    }

    /// Verify signature and expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, signed with another key or
    /// algorithm, or expired.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify as if the current time were `now`
    ///
    /// # Errors
    ///
    /// Same as [`TokenService::verify`].
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        }

        let header: TokenHeader = decode_segment(parts[0], "header")?;
        if header.alg != "RS256" {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = general_purpose::URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|e| TokenError::Malformed(format!("signature encoding: {e}")))?;
        let message = format!("{}.{}", parts[0], parts[1]);
        self.keys.verify(message.as_bytes(), &signature)?;

        let claims: TokenClaims = decode_segment(parts[1], "claims")?;
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, TokenError> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("{what} encoding: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("{what} json: {e}")))
}
