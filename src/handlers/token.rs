// Token issuing endpoints
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde::Serialize;

use super::{bearer_token, GatewayState};
use crate::errors::FlowError;
use crate::oauth::TokenExchangeRequest;
use crate::utils::request_id::RequestId;
use crate::utils::responses::ResponseBuilder;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// `POST /oauth/token`: a client collects the token for the session's user
///
/// # Errors
///
/// Never fails at the actix level; flow errors become JSON responses.
pub async fn token_exchange(
    req: HttpRequest,
    form: web::Form<TokenExchangeRequest>,
    request_id: RequestId,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse> {
    let session = state.sessions.load(&req);
    match state
        .flow
        .exchange_token(&form, &session, request_id.as_str())
        .await
    {
        Ok(token) => Ok(ResponseBuilder::ok_json(&TokenResponse {
            token: token.into_inner(),
        })),
        Err(err) => Ok(ResponseBuilder::flow_error(
            &err,
            request_id.as_str(),
            "token",
        )),
    }
}

/// `POST /token/{provider}`: log in with a provider ID token sent as bearer
///
/// # Errors
///
/// Never fails at the actix level; flow errors become JSON responses.
pub async fn provider_token(
    req: HttpRequest,
    path: web::Path<String>,
    request_id: RequestId,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse> {
    let provider = path.into_inner();
    let Some(id_token) = bearer_token(&req) else {
        return Ok(ResponseBuilder::flow_error(
            &FlowError::NotAuthenticated,
            request_id.as_str(),
            "provider_token",
        ));
    };

    match state
        .flow
        .exchange_id_token(&provider, id_token, request_id.as_str())
        .await
    {
        Ok((_, token)) => Ok(ResponseBuilder::ok_json(&TokenResponse {
            token: token.into_inner(),
        })),
        Err(err) => Ok(ResponseBuilder::flow_error(
            &err,
            request_id.as_str(),
            "provider_token",
        )),
    }
}
