//! Login flow orchestration
//!
//! One flow instance per request. The controller owns no per-flow state: the
//! pending login lives in the caller's session and is handed in on each step.
//!
//! ```text
//! Start -> ClientValidated -> Redirected -> CallbackReceived -> StateVerified
//!       -> CodeExchanged -> IdentityResolved -> UserResolved -> TokenIssued
//!       -> FinalRedirect
//! ```
//!
//! A failure at any step returns a [`FlowError`] and nothing after that step
//! runs. The session is only rewritten by the caller on success.

use std::fmt;

use serde::Deserialize;
use url::form_urlencoded;

use super::{CallbackParams, ProviderRegistry};
use crate::clients::ClientRegistry;
use crate::errors::{
    ClientValidationError, FlowError, ProviderError, SessionStateError, UserDirectoryError,
};
use crate::models::{
    AuthorizedClient, GatewaySession, PendingAuthRequest, SignedToken, User,
};
use crate::token::TokenService;
use crate::users::UserDirectory;
use crate::utils::crypto::{constant_time_eq, generate_state_nonce};
use crate::utils::logging::LoggingHelper;

/// Where a flow failed, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    ClientValidation,
    StateVerification,
    CodeExchange,
    IdentityFetch,
    UserResolution,
    TokenIssue,
    TokenExchange,
    BearerLogin,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClientValidation => "client validation",
            Self::StateVerification => "state verification",
            Self::CodeExchange => "code exchange",
            Self::IdentityFetch => "identity fetch",
            Self::UserResolution => "user resolution",
            Self::TokenIssue => "token issue",
            Self::TokenExchange => "token exchange",
            Self::BearerLogin => "bearer login",
        };
        f.write_str(name)
    }
}

/// Query parameters of `/login/{provider}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    pub client_id: Option<String>,
    pub redirect_url: Option<String>,
    pub state: Option<String>,
}

/// Result of a validated login request
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Provider authorization URL
    pub location: String,
    /// To be stored in the session before redirecting
    pub pending: PendingAuthRequest,
}

/// Result of a completed callback
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub user: User,
    pub token: SignedToken,
    /// Final redirect with `token` (and client `state`) attached
    pub location: String,
    pub authorized: AuthorizedClient,
}

impl CallbackOutcome {
    /// Session after the callback: the pending request is consumed
    #[must_use]
    pub fn session(&self) -> GatewaySession {
        GatewaySession {
            pending: None,
            user: Some(self.user.id),
            authorized: Some(self.authorized.clone()),
        }
    }
}

/// Form body of `POST /oauth/token`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenExchangeRequest {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_url: Option<String>,
    pub state: Option<String>,
}

fn required<'a>(
    value: Option<&'a String>,
    name: &'static str,
) -> Result<&'a str, ClientValidationError> {
    value
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ClientValidationError::MissingParameter(name))
}

#[derive(Clone)]
pub struct OAuthFlowController {
    providers: ProviderRegistry,
    clients: ClientRegistry,
    users: UserDirectory,
    tokens: TokenService,
}

impl OAuthFlowController {
    #[must_use]
    pub fn new(
        providers: ProviderRegistry,
        clients: ClientRegistry,
        users: UserDirectory,
        tokens: TokenService,
    ) -> Self {
        Self {
            providers,
            clients,
            users,
            tokens,
        }
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    fn fail(request_id: &str, stage: FlowStage, err: impl Into<FlowError>) -> FlowError {
        let err = err.into();
        LoggingHelper::log_flow_failure(request_id, stage, &err);
        err
    }

    /// Validate the client and build the provider redirect
    ///
    /// # Errors
    ///
    /// Unknown provider, a missing `client_id`, `redirect_url` or `state`,
    /// unknown client or a redirect outside the client's registered set.
    pub async fn login(
        &self,
        provider: &str,
        request: &LoginRequest,
        request_id: &str,
    ) -> Result<LoginRedirect, FlowError> {
        let stage = FlowStage::ClientValidation;
        let adapter = self
            .providers
            .get(provider)
            .map_err(|e| Self::fail(request_id, stage, e))?;

        let client_id = required(request.client_id.as_ref(), "client_id")
            .map_err(|e| Self::fail(request_id, stage, e))?;
        let redirect_url = required(request.redirect_url.as_ref(), "redirect_url")
            .map_err(|e| Self::fail(request_id, stage, e))?;
        let client_state = required(request.state.as_ref(), "state")
            .map_err(|e| Self::fail(request_id, stage, e))?;

        if !self.clients.exists(client_id).await {
            return Err(Self::fail(
                request_id,
                stage,
                ClientValidationError::UnknownClient,
            ));
        }
        let client = self
            .clients
            .resolve(client_id)
            .await
            .map_err(|e| Self::fail(request_id, stage, e))?;
        if !ClientRegistry::validate_redirect(&client, redirect_url) {
            return Err(Self::fail(
                request_id,
                stage,
                ClientValidationError::RedirectNotAllowed,
            ));
        }

        let state_nonce = generate_state_nonce();
        let location = adapter
            .authorization_url(&state_nonce)
            .map_err(|e| Self::fail(request_id, stage, e))?;
        LoggingHelper::log_login_redirect(provider, client_id, state_nonce.len());

        Ok(LoginRedirect {
            location,
            pending: PendingAuthRequest {
                state_nonce,
                provider: provider.to_string(),
                client_id: client.id,
                redirect_uri: redirect_url.to_string(),
                client_state: Some(client_state.to_string()),
            },
        })
    }

    /// Complete a provider callback
    ///
    /// The state nonce is verified before any provider or store call.
    ///
    /// # Errors
    ///
    /// Any failed step. The caller must leave the session untouched.
    pub async fn callback(
        &self,
        provider: &str,
        params: &CallbackParams,
        session: &GatewaySession,
        request_id: &str,
    ) -> Result<CallbackOutcome, FlowError> {
        let pending = Self::verify_state(provider, params, session, request_id)?;

        if let Some(error) = &params.error {
            let reason = match &params.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            return Err(Self::fail(
                request_id,
                FlowStage::CodeExchange,
                ProviderError::Denied(reason),
            ));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                Self::fail(request_id, FlowStage::CodeExchange, ProviderError::MissingCode)
            })?;

        let adapter = self
            .providers
            .get(provider)
            .map_err(|e| Self::fail(request_id, FlowStage::CodeExchange, e))?;
        let access_token = adapter
            .exchange_code(code)
            .await
            .map_err(|e| Self::fail(request_id, FlowStage::CodeExchange, e))?;
        let identity = adapter
            .fetch_identity(&access_token)
            .await
            .map_err(|e| Self::fail(request_id, FlowStage::IdentityFetch, e))?;

        let user = self
            .users
            .find_or_create(&identity)
            .await
            .map_err(|e| Self::fail(request_id, FlowStage::UserResolution, e))?;
        let token = self
            .tokens
            .issue(&user)
            .map_err(|e| Self::fail(request_id, FlowStage::TokenIssue, e))?;
        LoggingHelper::log_token_issued(&user.id.to_string(), token.as_str().len());

        let location = final_redirect(
            &pending.redirect_uri,
            &token,
            pending.client_state.as_deref(),
        );
        Ok(CallbackOutcome {
            user,
            token,
            location,
            authorized: AuthorizedClient {
                client_id: pending.client_id,
                redirect_uri: pending.redirect_uri.clone(),
                client_state: pending.client_state.clone(),
            },
        })
    }

    fn verify_state<'a>(
        provider: &str,
        params: &CallbackParams,
        session: &'a GatewaySession,
        request_id: &str,
    ) -> Result<&'a PendingAuthRequest, FlowError> {
        let stage = FlowStage::StateVerification;
        let pending = session
            .pending
            .as_ref()
            .ok_or_else(|| Self::fail(request_id, stage, SessionStateError::NoPendingRequest))?;
        let received = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Self::fail(request_id, stage, SessionStateError::MissingState))?;

        if !constant_time_eq(received, &pending.state_nonce) {
            LoggingHelper::log_state_mismatch(provider, request_id);
            return Err(Self::fail(request_id, stage, SessionStateError::StateMismatch));
        }
        if pending.provider != provider {
            return Err(Self::fail(request_id, stage, SessionStateError::ProviderMismatch));
        }
        Ok(pending)
    }

    /// Exchange an authenticated session for a token on behalf of a client
    ///
    /// # Errors
    ///
    /// The first failed check, in the order: presence, client, redirect,
    /// session binding, client state, secret, user.
    pub async fn exchange_token(
        &self,
        request: &TokenExchangeRequest,
        session: &GatewaySession,
        request_id: &str,
    ) -> Result<SignedToken, FlowError> {
        let stage = FlowStage::TokenExchange;
        let fail = |e: FlowError| Self::fail(request_id, stage, e);

        let client_id =
            required(request.client_id.as_ref(), "client_id").map_err(|e| fail(e.into()))?;
        let client_secret =
            required(request.client_secret.as_ref(), "client_secret").map_err(|e| fail(e.into()))?;
        required(request.code.as_ref(), "code").map_err(|e| fail(e.into()))?;
        let redirect_url =
            required(request.redirect_url.as_ref(), "redirect_url").map_err(|e| fail(e.into()))?;
        let state = required(request.state.as_ref(), "state").map_err(|e| fail(e.into()))?;

        let client = self
            .clients
            .resolve(client_id)
            .await
            .map_err(|e| fail(e.into()))?;
        if !ClientRegistry::validate_redirect(&client, redirect_url) {
            return Err(fail(ClientValidationError::RedirectNotAllowed.into()));
        }

        let (Some(user_id), Some(authorized)) = (session.user, session.authorized.as_ref()) else {
            return Err(fail(FlowError::NotAuthenticated));
        };
        if authorized.client_id != client.id {
            return Err(fail(ClientValidationError::ClientMismatch.into()));
        }
        if authorized.redirect_uri != redirect_url {
            return Err(fail(ClientValidationError::RedirectMismatch.into()));
        }
        let state_matches = authorized
            .client_state
            .as_deref()
            .is_some_and(|expected| constant_time_eq(expected, state));
        if !state_matches {
            return Err(fail(SessionStateError::StateMismatch.into()));
        }

        if !self.clients.validate_secret(&client, client_secret).await {
            return Err(fail(ClientValidationError::InvalidSecret.into()));
        }

        let user = self.users.get_by_id(user_id).await.map_err(|e| match e {
            UserDirectoryError::NotFound => fail(FlowError::NotAuthenticated),
            other => fail(other.into()),
        })?;
        let token = self.tokens.issue(&user).map_err(|e| fail(e.into()))?;
        LoggingHelper::log_token_issued(&user.id.to_string(), token.as_str().len());
        Ok(token)
    }

    /// Log in with a provider-issued ID token
    ///
    /// # Errors
    ///
    /// Unknown provider, a token that fails verification, or a store failure.
    pub async fn exchange_id_token(
        &self,
        provider: &str,
        id_token: &str,
        request_id: &str,
    ) -> Result<(User, SignedToken), FlowError> {
        let stage = FlowStage::BearerLogin;
        let adapter = self
            .providers
            .get(provider)
            .map_err(|e| Self::fail(request_id, stage, e))?;
        let identity = adapter
            .verify_bearer_token(id_token)
            .await
            .map_err(|e| Self::fail(request_id, stage, e))?;
        let user = self
            .users
            .find_or_create(&identity)
            .await
            .map_err(|e| Self::fail(request_id, FlowStage::UserResolution, e))?;
        let token = self
            .tokens
            .issue(&user)
            .map_err(|e| Self::fail(request_id, FlowStage::TokenIssue, e))?;
        LoggingHelper::log_token_issued(&user.id.to_string(), token.as_str().len());
        Ok((user, token))
    }
}

/// Append `token` and the client's `state` to the stored redirect, or to `/`
fn final_redirect(redirect_uri: &str, token: &SignedToken, client_state: Option<&str>) -> String {
    if let Ok(mut url) = url::Url::parse(redirect_uri) {
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", token.as_str());
            if let Some(state) = client_state {
                query.append_pair("state", state);
            }
        }
        return url.into();
    }

    let base = if redirect_uri.is_empty() { "/" } else { redirect_uri };
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("token", token.as_str());
    if let Some(state) = client_state {
        query.append_pair("state", state);
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{}", query.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;

    fn login_request(ctx: &TestContext) -> LoginRequest {
        LoginRequest {
            client_id: Some(ctx.client.id.to_string()),
            redirect_url: Some(TestContext::REDIRECT_URI.to_string()),
            state: Some("client-xyz".to_string()),
        }
    }

    async fn logged_in(ctx: &TestContext) -> (CallbackOutcome, GatewaySession) {
        let redirect = ctx
            .flow
            .login("mock", &login_request(ctx), "req-1")
            .await
            .unwrap();
        let session = GatewaySession::for_login(redirect.pending.clone());
        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some(redirect.pending.state_nonce.clone()),
            ..Default::default()
        };
        let outcome = ctx
            .flow
            .callback("mock", &params, &session, "req-2")
            .await
            .unwrap();
        let session = outcome.session();
        (outcome, session)
    }

    fn exchange_request(ctx: &TestContext) -> TokenExchangeRequest {
        TokenExchangeRequest {
            client_id: Some(ctx.client.id.to_string()),
            client_secret: Some(ctx.client_secret.clone()),
            code: Some("anything".to_string()),
            redirect_url: Some(TestContext::REDIRECT_URI.to_string()),
            state: Some("client-xyz".to_string()),
        }
    }

    #[tokio::test]
    async fn test_login_builds_pending_request() {
        let ctx = TestContext::new().await;
        let redirect = ctx
            .flow
            .login("mock", &login_request(&ctx), "req")
            .await
            .unwrap();

        assert!(redirect.pending.state_nonce.len() >= 32);
        assert!(redirect.location.contains(&redirect.pending.state_nonce));
        assert_eq!(redirect.pending.client_id, ctx.client.id);
        assert_eq!(redirect.pending.client_state.as_deref(), Some("client-xyz"));
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let ctx = TestContext::new().await;

        let mut request = login_request(&ctx);
        request.redirect_url = Some("https://app/cb/evil".to_string());
        let err = ctx.flow.login("mock", &request, "req").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ClientValidation(ClientValidationError::RedirectNotAllowed)
        ));

        let mut request = login_request(&ctx);
        request.client_id = Some(uuid::Uuid::new_v4().to_string());
        let err = ctx.flow.login("mock", &request, "req").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ClientValidation(ClientValidationError::UnknownClient)
        ));

        let mut request = login_request(&ctx);
        request.client_id = None;
        let err = ctx.flow.login("mock", &request, "req").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ClientValidation(ClientValidationError::MissingParameter("client_id"))
        ));

        for missing_state in [None, Some(String::new())] {
            let mut request = login_request(&ctx);
            request.state = missing_state;
            let err = ctx.flow.login("mock", &request, "req").await.unwrap_err();
            assert!(matches!(
                err,
                FlowError::ClientValidation(ClientValidationError::MissingParameter("state"))
            ));
        }

        let err = ctx
            .flow
            .login("facebook", &login_request(&ctx), "req")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Provider(ProviderError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_state_mismatch_never_reaches_provider_or_store() {
        let ctx = TestContext::new().await;
        let redirect = ctx
            .flow
            .login("mock", &login_request(&ctx), "req")
            .await
            .unwrap();
        let session = GatewaySession::for_login(redirect.pending);

        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some("forged-state".to_string()),
            ..Default::default()
        };
        let err = ctx
            .flow
            .callback("mock", &params, &session, "req")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FlowError::SessionState(SessionStateError::StateMismatch)
        ));
        assert_eq!(ctx.provider.exchange_calls(), 0);
        assert_eq!(ctx.store.user_calls(), 0);
    }

    #[tokio::test]
    async fn test_callback_without_pending_request_fails() {
        let ctx = TestContext::new().await;
        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some("whatever".to_string()),
            ..Default::default()
        };
        let err = ctx
            .flow
            .callback("mock", &params, &GatewaySession::default(), "req")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::SessionState(SessionStateError::NoPendingRequest)
        ));
    }

    #[tokio::test]
    async fn test_callback_creates_user_and_redirects_with_token() {
        let ctx = TestContext::new().await;
        let (outcome, session) = logged_in(&ctx).await;

        let claims = ctx.tokens.verify(outcome.token.as_str()).unwrap();
        assert_eq!(claims.uid, outcome.user.id);
        assert!(outcome
            .location
            .starts_with(&format!("{}?token=", TestContext::REDIRECT_URI)));
        assert!(outcome.location.ends_with("&state=client-xyz"));
        assert_eq!(session.user, Some(outcome.user.id));
        assert!(session.pending.is_none());
        assert_eq!(ctx.store.inner().user_count().await, 1);
    }

    #[tokio::test]
    async fn test_consumed_state_cannot_be_replayed() {
        let ctx = TestContext::new().await;
        let redirect = ctx
            .flow
            .login("mock", &login_request(&ctx), "req")
            .await
            .unwrap();
        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some(redirect.pending.state_nonce.clone()),
            ..Default::default()
        };
        let outcome = ctx
            .flow
            .callback("mock", &params, &GatewaySession::for_login(redirect.pending), "req")
            .await
            .unwrap();

        let err = ctx
            .flow
            .callback("mock", &params, &outcome.session(), "req")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::SessionState(SessionStateError::NoPendingRequest)
        ));
    }

    #[tokio::test]
    async fn test_provider_denial_and_exchange_failure_do_not_create_users() {
        let ctx = TestContext::new().await;
        let redirect = ctx
            .flow
            .login("mock", &login_request(&ctx), "req")
            .await
            .unwrap();
        let session = GatewaySession::for_login(redirect.pending.clone());

        let denied = CallbackParams {
            state: Some(redirect.pending.state_nonce.clone()),
            error: Some("access_denied".to_string()),
            ..Default::default()
        };
        let err = ctx
            .flow
            .callback("mock", &denied, &session, "req")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Provider(ProviderError::Denied(_))));

        ctx.provider.fail_exchange();
        let params = CallbackParams {
            code: Some("expired".to_string()),
            state: Some(redirect.pending.state_nonce.clone()),
            ..Default::default()
        };
        let err = ctx
            .flow
            .callback("mock", &params, &session, "req")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Provider(ProviderError::CodeExchange(_))
        ));
        assert_eq!(ctx.store.user_calls(), 0);
    }

    #[tokio::test]
    async fn test_exchange_token_issues_for_bound_session() {
        let ctx = TestContext::new().await;
        let (outcome, session) = logged_in(&ctx).await;

        let token = ctx
            .flow
            .exchange_token(&exchange_request(&ctx), &session, "req")
            .await
            .unwrap();
        assert_eq!(ctx.tokens.verify(token.as_str()).unwrap().uid, outcome.user.id);
    }

    #[tokio::test]
    async fn test_exchange_token_check_order() {
        let ctx = TestContext::new().await;
        let (_, session) = logged_in(&ctx).await;

        let mut request = exchange_request(&ctx);
        request.code = Some(String::new());
        let err = ctx.flow.exchange_token(&request, &session, "req").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ClientValidation(ClientValidationError::MissingParameter("code"))
        ));

        let err = ctx
            .flow
            .exchange_token(&exchange_request(&ctx), &GatewaySession::default(), "req")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NotAuthenticated));

        let mut request = exchange_request(&ctx);
        request.state = Some("other".to_string());
        request.client_secret = Some("wrong".to_string());
        let err = ctx.flow.exchange_token(&request, &session, "req").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::SessionState(SessionStateError::StateMismatch)
        ));

        let mut request = exchange_request(&ctx);
        request.client_secret = Some("d3Jvbmc".to_string());
        let err = ctx.flow.exchange_token(&request, &session, "req").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ClientValidation(ClientValidationError::InvalidSecret)
        ));
    }

    #[tokio::test]
    async fn test_exchange_token_rejects_other_client() {
        let ctx = TestContext::new().await;
        let (_, session) = logged_in(&ctx).await;
        let (other, other_secret) = ctx
            .clients
            .register("Other", &[TestContext::REDIRECT_URI.to_string()], &[], false)
            .await
            .unwrap();

        let mut request = exchange_request(&ctx);
        request.client_id = Some(other.id.to_string());
        request.client_secret = Some(other_secret);
        let err = ctx.flow.exchange_token(&request, &session, "req").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ClientValidation(ClientValidationError::ClientMismatch)
        ));
    }

    #[tokio::test]
    async fn test_exchange_id_token() {
        let ctx = TestContext::new().await;
        let (user, token) = ctx
            .flow
            .exchange_id_token("mock", "provider-id-token", "req")
            .await
            .unwrap();
        assert_eq!(ctx.tokens.verify(token.as_str()).unwrap().uid, user.id);

        ctx.provider.fail_verification();
        let err = ctx
            .flow
            .exchange_id_token("mock", "provider-id-token", "req")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), actix_web::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_final_redirect_without_stored_uri() {
        let token = SignedToken::new("a.b.c".to_string());
        assert_eq!(final_redirect("", &token, None), "/?token=a.b.c");
        assert_eq!(
            final_redirect("https://app/cb?x=1", &token, Some("s 1")),
            "https://app/cb?x=1&token=a.b.c&state=s+1"
        );
    }
}
