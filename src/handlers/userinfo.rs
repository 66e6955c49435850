// Protected user endpoint and the bearer token extractor guarding it
use std::future::{ready, Ready};

use actix_web::{
    dev::Payload, error::InternalError, web, FromRequest, HttpRequest, HttpResponse, Result,
};
use serde::Serialize;
use uuid::Uuid;

use super::{bearer_token, GatewayState};
use crate::errors::{FlowError, UserDirectoryError};
use crate::token::TokenClaims;
use crate::utils::request_id::RequestId;
use crate::utils::responses::ResponseBuilder;

/// Claims of a verified gateway token from `Authorization: Bearer`
///
/// Extraction fails with a 401 JSON body when the header is missing or the
/// token does not verify.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub TokenClaims);

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.0.uid
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let request_id = RequestId::from_request_headers(req);
        let reject = |err: FlowError| -> actix_web::Error {
            let response = ResponseBuilder::flow_error(&err, request_id.as_str(), "userinfo");
            InternalError::from_response(err, response).into()
        };

        let Some(state) = req.app_data::<web::Data<GatewayState>>() else {
            return ready(Err(reject(FlowError::Session(
                "gateway state is not configured".to_string(),
            ))));
        };
        let Some(token) = bearer_token(req) else {
            return ready(Err(reject(FlowError::NotAuthenticated)));
        };

        ready(
            state
                .tokens
                .verify(token)
                .map(AuthenticatedUser)
                .map_err(|e| reject(e.into())),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub provider: String,
}

/// `GET /userinfo`
///
/// # Errors
///
/// Never fails at the actix level.
pub async fn userinfo(
    user: AuthenticatedUser,
    request_id: RequestId,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse> {
    match state.users.get_by_id(user.user_id()).await {
        Ok(user) => Ok(ResponseBuilder::ok_json(&UserInfoResponse {
            id: user.id,
            name: user.display_name,
            email: user.email,
            provider: user.provider,
        })),
        Err(UserDirectoryError::NotFound) => Ok(ResponseBuilder::flow_error(
            &FlowError::NotAuthenticated,
            request_id.as_str(),
            "userinfo",
        )),
        Err(err) => Ok(ResponseBuilder::flow_error(
            &FlowError::from(err),
            request_id.as_str(),
            "userinfo",
        )),
    }
}
