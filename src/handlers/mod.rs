// HTTP request handlers for the identity gateway
pub mod oauth;
pub mod status;
pub mod token;
pub mod userinfo;

use actix_web::error::{InternalError, QueryPayloadError, UrlencodedError};
use actix_web::{http::header, web, HttpRequest};
use log::debug;

use crate::errors::{ClientValidationError, FlowError};
use crate::oauth::OAuthFlowController;
use crate::session::SessionManager;
use crate::token::TokenService;
use crate::users::UserDirectory;
use crate::utils::request_id::RequestId;
use crate::utils::responses::ResponseBuilder;

pub use oauth::{oauth_callback, oauth_login, oauth_logout};
pub use status::{error_page, health};
pub use token::{provider_token, token_exchange};
pub use userinfo::{userinfo, AuthenticatedUser};

/// Everything a handler needs, shared across workers through `web::Data`
#[derive(Clone)]
pub struct GatewayState {
    pub flow: OAuthFlowController,
    pub sessions: SessionManager,
    pub tokens: TokenService,
    pub users: UserDirectory,
}

/// Register every route on an actix `App`
///
/// Query and form bodies that fail to parse are answered in the same shape as
/// flow errors: JSON for API calls, the error page for the provider callback.
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(query_error))
        .app_data(web::FormConfig::default().error_handler(form_error))
        .route("/login/{provider}", web::get().to(oauth_login))
        .service(
            web::resource("/callback/{provider}")
                .app_data(web::QueryConfig::default().error_handler(callback_query_error))
                .route(web::get().to(oauth_callback)),
        )
        .route("/logout", web::get().to(oauth_logout))
        .route("/oauth/token", web::post().to(token_exchange))
        .route("/token/{provider}", web::post().to(provider_token))
        .route("/userinfo", web::get().to(userinfo))
        .route("/error", web::get().to(error_page))
        .route("/ping", web::get().to(health));
}

fn malformed(detail: String) -> FlowError {
    debug!("Rejecting malformed request: {detail}");
    ClientValidationError::InvalidRequest(detail).into()
}

/// Endpoint name reported in JSON error bodies, e.g. `login` for `/login/google`
fn endpoint_name(req: &HttpRequest) -> &str {
    req.path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
}

fn query_error(err: QueryPayloadError, req: &HttpRequest) -> actix_web::Error {
    let flow_error = malformed(err.to_string());
    let request_id = RequestId::from_request_headers(req);
    let response =
        ResponseBuilder::flow_error(&flow_error, request_id.as_str(), endpoint_name(req));
    InternalError::from_response(err, response).into()
}

fn callback_query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = ResponseBuilder::error_page_redirect(&malformed(err.to_string()));
    InternalError::from_response(err, response).into()
}

fn form_error(err: UrlencodedError, req: &HttpRequest) -> actix_web::Error {
    let flow_error = malformed(err.to_string());
    let request_id = RequestId::from_request_headers(req);
    let response = ResponseBuilder::flow_error(&flow_error, request_id.as_str(), "token");
    InternalError::from_response(err, response).into()
}

/// Token from an `Authorization: Bearer <token>` header
pub(crate) fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
