//! HTTP response handling
//!
//! One place that shapes every response the gateway sends: JSON error bodies,
//! redirects carrying cookies, and the error page redirect used by browser flows.

use actix_web::{cookie::Cookie, http::header, http::StatusCode, HttpResponse};
use serde::Serialize;
use url::form_urlencoded;

use crate::errors::FlowError;

/// Version string reported in error bodies
pub const API_VERSION: &str = "v1";

/// Path of the error page browser flows are redirected to
pub const ERROR_PAGE_PATH: &str = "/error";

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "apiVersion")]
    api_version: &'a str,
    id: &'a str,
    method: &'a str,
    error: ErrorData<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorData<'a> {
    code: u16,
    reason: &'a str,
    message: &'a str,
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// JSON error body for a failed flow
    #[must_use]
    pub fn flow_error(err: &FlowError, request_id: &str, method: &str) -> HttpResponse {
        Self::error(
            err.status_code(),
            err.error_code(),
            &err.public_message(),
            request_id,
            method,
        )
    }

    /// JSON error body with an explicit status
    ///
    /// 500 responses never carry the caller-supplied message.
    #[must_use]
    pub fn error(
        status: StatusCode,
        reason: &str,
        message: &str,
        request_id: &str,
        method: &str,
    ) -> HttpResponse {
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal server error occurred"
        } else {
            message
        };
        let body = ErrorBody {
            api_version: API_VERSION,
            id: request_id,
            method,
            error: ErrorData {
                code: status.as_u16(),
                reason,
                message,
            },
        };
        HttpResponse::build(status)
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .json(body)
    }

    /// 302 to the error page with `Error`, `Error_description` and `Error_hint`
    #[must_use]
    pub fn error_page_redirect(err: &FlowError) -> HttpResponse {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("Error", err.error_code())
            .append_pair("Error_description", &err.public_message())
            .append_pair("Error_hint", err.hint())
            .finish();
        Self::redirect(&format!("{ERROR_PAGE_PATH}?{query}"), Vec::new())
    }

    /// 302 Found with optional cookies
    #[must_use]
    pub fn redirect(location: &str, cookies: Vec<Cookie<'static>>) -> HttpResponse {
        Self::redirect_with_status(StatusCode::FOUND, location, cookies)
    }

    /// 307 Temporary Redirect with optional cookies
    #[must_use]
    pub fn temporary_redirect(location: &str, cookies: Vec<Cookie<'static>>) -> HttpResponse {
        Self::redirect_with_status(StatusCode::TEMPORARY_REDIRECT, location, cookies)
    }

    fn redirect_with_status(
        status: StatusCode,
        location: &str,
        cookies: Vec<Cookie<'static>>,
    ) -> HttpResponse {
        let mut builder = HttpResponse::build(status);
        for cookie in cookies {
            builder.cookie(cookie);
        }
        builder
            .insert_header((header::LOCATION, location.to_string()))
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .finish()
    }

    /// 200 with a JSON body
    #[must_use]
    pub fn ok_json<T: Serialize>(body: &T) -> HttpResponse {
        HttpResponse::Ok()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .json(body)
    }
}
