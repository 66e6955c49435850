// OAuth handlers: login, callback, and logout
use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::debug;

use super::GatewayState;
use crate::models::GatewaySession;
use crate::oauth::{CallbackParams, LoginRequest};
use crate::utils::request_id::RequestId;
use crate::utils::responses::ResponseBuilder;

/// Start a login with `provider`
///
/// Validates the client and its redirect, stores the pending request in a
/// fresh session and answers 307 to the provider. Any previous session is
/// replaced.
///
/// # Errors
///
/// Never fails at the actix level; flow errors become JSON responses.
pub async fn oauth_login(
    path: web::Path<String>,
    query: web::Query<LoginRequest>,
    request_id: RequestId,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse> {
    let provider = path.into_inner();
    let redirect = match state
        .flow
        .login(&provider, &query, request_id.as_str())
        .await
    {
        Ok(redirect) => redirect,
        Err(err) => return Ok(ResponseBuilder::flow_error(&err, request_id.as_str(), "login")),
    };

    let session = GatewaySession::for_login(redirect.pending);
    match state.sessions.cookie(&session) {
        Ok(cookie) => Ok(ResponseBuilder::temporary_redirect(
            &redirect.location,
            vec![cookie],
        )),
        Err(err) => Ok(ResponseBuilder::flow_error(&err, request_id.as_str(), "login")),
    }
}

/// Provider redirect target
///
/// On success the session records the user and the client binding and the
/// user agent is sent to the client's redirect with the token attached. On
/// failure the session is left as it was and the user agent goes to the
/// error page.
///
/// # Errors
///
/// Never fails at the actix level.
pub async fn oauth_callback(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<CallbackParams>,
    request_id: RequestId,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse> {
    let provider = path.into_inner();
    let session = state.sessions.load(&req);

    let outcome = match state
        .flow
        .callback(&provider, &query, &session, request_id.as_str())
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return Ok(ResponseBuilder::error_page_redirect(&err)),
    };

    match state.sessions.cookie(&outcome.session()) {
        Ok(cookie) => {
            debug!("Login via {provider} complete for user {}", outcome.user.id);
            Ok(ResponseBuilder::redirect(&outcome.location, vec![cookie]))
        }
        Err(err) => Ok(ResponseBuilder::error_page_redirect(&err)),
    }
}

/// Drop the session and return to `/`
///
/// # Errors
///
/// Never fails at the actix level.
pub async fn oauth_logout(state: web::Data<GatewayState>) -> Result<HttpResponse> {
    Ok(ResponseBuilder::redirect(
        "/",
        vec![state.sessions.clear_cookie()],
    ))
}
