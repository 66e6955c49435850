//! Error taxonomy for the gateway
//!
//! Each component owns a closed error enum. The HTTP layer is the only place
//! where these are turned into status codes (see [`FlowError::status_code`]).

use actix_web::http::StatusCode;
use thiserror::Error;

/// Errors raised while loading startup configuration or signing keys.
///
/// These are fatal: the process cannot serve traffic without valid keys.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read key file {path}: {source}")]
    KeyFileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {kind} key from {path}: {reason}")]
    KeyParse {
        kind: &'static str,
        path: String,
        reason: String,
    },
    #[error("signing key does not match verification key")]
    KeyPairMismatch,
    #[error("failed to load settings from {path}: {reason}")]
    SettingsFile { path: String, reason: String },
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("provider {provider} is missing {field}")]
    MissingProviderField {
        provider: String,
        field: &'static str,
    },
    #[error("invalid client registration {id}: {reason}")]
    InvalidClient { id: String, reason: String },
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the collaborator stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("duplicate record for {0}")]
    Duplicate(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Client validation failures (unknown client, disallowed redirect, bad secret).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientValidationError {
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("malformed request: {0}")]
    InvalidRequest(String),
    #[error("the client does not exist")]
    UnknownClient,
    #[error("the redirect uri is not registered for this client")]
    RedirectNotAllowed,
    #[error("the redirect uri does not match the one used at login")]
    RedirectMismatch,
    #[error("the client does not match the one used at login")]
    ClientMismatch,
    #[error("invalid client secret")]
    InvalidSecret,
    #[error("client store unavailable: {0}")]
    Store(StoreError),
}

/// Session state failures. Treated as potential CSRF / session fixation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStateError {
    #[error("no pending authorization request in session")]
    NoPendingRequest,
    #[error("invalid session state")]
    StateMismatch,
    #[error("callback provider does not match the pending request")]
    ProviderMismatch,
    #[error("missing state parameter")]
    MissingState,
}

/// Failures talking to an upstream identity provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider returned an error: {0}")]
    Denied(String),
    #[error("missing authorization code")]
    MissingCode,
    #[error("code exchange failed: {0}")]
    CodeExchange(String),
    #[error("identity fetch failed: {0}")]
    IdentityFetch(String),
    #[error("token verification failed: {0}")]
    TokenVerification(String),
    #[error("failed to build authorization url: {0}")]
    AuthorizationUrl(String),
}

/// Failures resolving a local user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserDirectoryError {
    #[error("user store failure: {0}")]
    Store(StoreError),
    #[error("user not found")]
    NotFound,
}

/// Failures issuing or verifying gateway tokens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
}

/// Top level error for one flow instance.
///
/// Once a flow produces one of these it does not advance any further.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    ClientValidation(#[from] ClientValidationError),
    #[error(transparent)]
    SessionState(#[from] SessionStateError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    UserDirectory(#[from] UserDirectoryError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("session could not be saved: {0}")]
    Session(String),
}

impl FlowError {
    /// Transport status code for this failure
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientValidation(
                ClientValidationError::UnknownClient | ClientValidationError::InvalidSecret,
            )
            | Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::ClientValidation(ClientValidationError::Store(_))
            | Self::UserDirectory(_)
            | Self::Session(_)
            | Self::Token(TokenError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Provider(
                ProviderError::CodeExchange(_)
                | ProviderError::IdentityFetch(_)
                | ProviderError::AuthorizationUrl(_),
            ) => StatusCode::BAD_GATEWAY,
            Self::Provider(ProviderError::UnknownProvider(_)) => StatusCode::NOT_FOUND,
            Self::Provider(ProviderError::TokenVerification(_)) | Self::Token(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::ClientValidation(_) | Self::SessionState(_) | Self::Provider(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    /// Machine readable error code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ClientValidation(ClientValidationError::Store(_))
            | Self::Token(TokenError::Signing(_))
            | Self::UserDirectory(_)
            | Self::Session(_) => "server_error",
            Self::ClientValidation(
                ClientValidationError::UnknownClient | ClientValidationError::InvalidSecret,
            ) => "invalid_client",
            Self::ClientValidation(
                ClientValidationError::RedirectNotAllowed | ClientValidationError::RedirectMismatch,
            ) => "invalid_redirect",
            Self::ClientValidation(_) => "invalid_request",
            Self::SessionState(_) => "invalid_state",
            Self::Provider(ProviderError::Denied(_)) => "access_denied",
            Self::Provider(ProviderError::UnknownProvider(_)) => "unsupported_provider",
            Self::Provider(ProviderError::TokenVerification(_)) | Self::Token(_) => "invalid_token",
            Self::Provider(_) => "provider_error",
            Self::NotAuthenticated => "unauthorized",
        }
    }

    /// Message safe to show the caller. Internal failures are hidden.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.status_code().is_server_error() && !matches!(self, Self::Provider(_)) {
            return "An internal server error occurred".to_string();
        }
        match self {
            Self::Provider(
                ProviderError::CodeExchange(_)
                | ProviderError::IdentityFetch(_)
                | ProviderError::AuthorizationUrl(_),
            ) => "The identity provider could not complete the login".to_string(),
            Self::Provider(ProviderError::TokenVerification(_)) | Self::Token(_) => {
                "The provided token is invalid or has expired".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Short hint for the error page
    #[must_use]
    pub fn hint(&self) -> &'static str {
        match self {
            Self::SessionState(_) => "Start the login again from your application",
            Self::ClientValidation(_) => "Check the client registration",
            Self::Provider(_) => "Try logging in again",
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = FlowError::UserDirectory(UserDirectoryError::Store(StoreError::Backend(
            "connection refused on 10.0.0.3".to_string(),
        )));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("10.0.0.3"));
        assert_eq!(err.error_code(), "server_error");
    }

    #[test]
    fn test_client_errors_map_to_4xx() {
        let err = FlowError::from(ClientValidationError::RedirectNotAllowed);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "invalid_redirect");

        let err = FlowError::from(ClientValidationError::InvalidSecret);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code(), "invalid_client");
    }

    #[test]
    fn test_every_server_error_reports_server_error_code() {
        let errors = [
            FlowError::from(TokenError::Signing("key unavailable".to_string())),
            FlowError::from(ClientValidationError::Store(StoreError::Timeout)),
            FlowError::Session("encryption failed".to_string()),
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(err.error_code(), "server_error", "{err:?}");
        }

        let err = FlowError::from(TokenError::Expired);
        assert_eq!(err.error_code(), "invalid_token");
    }

    #[test]
    fn test_malformed_request_is_bad_request() {
        let err = FlowError::from(ClientValidationError::InvalidRequest(
            "duplicate field `state`".to_string(),
        ));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[test]
    fn test_state_mismatch_is_bad_request() {
        let err = FlowError::from(SessionStateError::StateMismatch);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "invalid_state");
        assert_eq!(err.public_message(), "invalid session state");
    }

    #[test]
    fn test_provider_failures_are_gateway_errors() {
        let err = FlowError::from(ProviderError::CodeExchange("invalid_grant".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(!err.public_message().contains("invalid_grant"));
    }
}
