use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Correlation ID for one request
///
/// Taken from `X-Request-Id` when the caller sends a sane one, otherwise a fresh
/// UUID v4. Attached to error bodies and error logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    #[must_use]
    pub fn from_request_headers(req: &HttpRequest) -> Self {
        req.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| {
                !value.is_empty()
                    && value.len() <= 128
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            })
            .map_or_else(Self::generate, |value| Self(value.to_string()))
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromRequest for RequestId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(Self::from_request_headers(req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_header_is_reused() {
        let req = TestRequest::default()
            .insert_header((REQUEST_ID_HEADER, "abc-123"))
            .to_http_request();
        assert_eq!(RequestId::from_request_headers(&req).as_str(), "abc-123");
    }

    #[test]
    fn test_missing_or_unsafe_header_generates_uuid() {
        let req = TestRequest::default().to_http_request();
        let id = RequestId::from_request_headers(&req);
        assert!(Uuid::parse_str(id.as_str()).is_ok());

        let req = TestRequest::default()
            .insert_header((REQUEST_ID_HEADER, "bad id with spaces"))
            .to_http_request();
        let id = RequestId::from_request_headers(&req);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }
}
