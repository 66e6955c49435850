use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A registered OAuth client application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    pub id: Uuid,
    pub display_name: String,
    /// bcrypt hash of the decoded client secret
    pub client_secret_hash: String,
    pub redirect_uris: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub is_private: bool,
}

/// A local user record created on first login
///
/// `(provider, external_id)` is the natural key. Email is a display
/// attribute only and is never used for matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub provider: String,
    pub external_id: String,
    pub email: Option<String>,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl User {
    /// Build a fresh record for an identity that has never logged in before
    #[must_use]
    pub fn from_identity(identity: &ExternalIdentity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            display_name: identity.display_name.clone(),
            provider: identity.provider.clone(),
            external_id: identity.provider_user_id.clone(),
            email: identity.email.clone(),
            created: now,
            last_updated: now,
        }
    }
}

/// Normalized identity returned by a provider adapter. Never persisted as-is.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider: String,
    pub provider_user_id: String,
    pub display_name: String,
    email: Option<String>,
    pub email_verified: bool,
}

impl ExternalIdentity {
    /// Create an identity. An email the provider did not verify is dropped.
    #[must_use]
    pub fn new(
        provider: &str,
        provider_user_id: String,
        display_name: String,
        email: Option<String>,
        email_verified: bool,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            provider_user_id,
            display_name,
            email: if email_verified { email } else { None },
            email_verified,
        }
    }

    /// The verified email, if any
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// Login attempt data carried in the session between `/login` and `/callback`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAuthRequest {
    pub state_nonce: String,
    pub provider: String,
    pub client_id: Uuid,
    pub redirect_uri: String,
    /// Opaque value supplied by the client at login, echoed back on redirect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
}

/// Client binding recorded after a successful callback, checked at `/oauth/token`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizedClient {
    pub client_id: Uuid,
    pub redirect_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
}

/// Typed contents of the encrypted session cookie
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingAuthRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized: Option<AuthorizedClient>,
}

impl GatewaySession {
    /// Session for a fresh login attempt. Any previous user binding is dropped.
    #[must_use]
    pub fn for_login(pending: PendingAuthRequest) -> Self {
        Self {
            pending: Some(pending),
            user: None,
            authorized: None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Compact serialized, RS256 signed bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken(String);

impl SignedToken {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SignedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unverified_email_is_dropped() {
        let identity = ExternalIdentity::new(
            "google",
            "ext-1".to_string(),
            "Jane".to_string(),
            Some("jane@example.com".to_string()),
            false,
        );
        assert_eq!(identity.email(), None);
        assert!(!identity.email_verified);

        let user = User::from_identity(&identity);
        assert_eq!(user.email, None);
    }

    #[test]
    fn test_verified_email_is_kept() {
        let identity = ExternalIdentity::new(
            "microsoft",
            "ext-2".to_string(),
            "John".to_string(),
            Some("john@example.com".to_string()),
            true,
        );
        let user = User::from_identity(&identity);
        assert_eq!(user.email.as_deref(), Some("john@example.com"));
        assert_eq!(user.external_id, "ext-2");
        assert_eq!(user.provider, "microsoft");
        assert_eq!(user.created, user.last_updated);
    }

    #[test]
    fn test_login_session_resets_user() {
        let pending = PendingAuthRequest {
            state_nonce: "n".repeat(32),
            provider: "google".to_string(),
            client_id: Uuid::new_v4(),
            redirect_uri: "https://app/cb".to_string(),
            client_state: None,
        };
        let session = GatewaySession::for_login(pending.clone());
        assert!(!session.is_authenticated());
        assert_eq!(session.pending, Some(pending));

        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("user"));
    }
}
