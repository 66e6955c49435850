//! Encrypted session cookie
//!
//! The session holds the typed [`GatewaySession`]: the pending login request
//! between `/login` and `/callback`, then the authenticated user and the
//! client binding checked at `/oauth/token`.

pub mod cookie;

use actix_web::cookie::time::Duration;
use actix_web::cookie::Cookie;
use actix_web::HttpRequest;
use log::debug;

pub use cookie::{CookieFactory, CookieOptions};

use crate::errors::FlowError;
use crate::models::GatewaySession;
use crate::settings::Settings;
use crate::utils::crypto::{decrypt_data, derive_encryption_key};

#[derive(Clone)]
pub struct SessionManager {
    cookie_name: String,
    max_age_seconds: u64,
    cookies: CookieFactory,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        session_secret: &str,
        cookie_name: &str,
        cookie_secure: bool,
        max_age_seconds: u64,
    ) -> Self {
        Self {
            cookie_name: cookie_name.to_string(),
            max_age_seconds,
            cookies: CookieFactory::new(derive_encryption_key(session_secret), cookie_secure),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.session.session_secret,
            &settings.session.cookie_name,
            settings.cookies.secure,
            settings.session.max_age_seconds,
        )
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Session carried by the request
    ///
    /// A missing, tampered or undecryptable cookie yields an empty session.
    #[must_use]
    pub fn load(&self, req: &HttpRequest) -> GatewaySession {
        let Some(cookie) = req.cookie(&self.cookie_name) else {
            return GatewaySession::default();
        };
        if cookie.value().is_empty() {
            return GatewaySession::default();
        }
        decrypt_data(cookie.value(), self.cookies.encryption_key()).unwrap_or_else(|e| {
            debug!("Discarding unreadable session cookie: {e}");
            GatewaySession::default()
        })
    }

    /// Seal `session` into a cookie
    ///
    /// # Errors
    ///
    /// `FlowError::Session` if encryption fails.
    pub fn cookie(&self, session: &GatewaySession) -> Result<Cookie<'static>, FlowError> {
        let max_age = Duration::seconds(i64::try_from(self.max_age_seconds).unwrap_or(3600));
        self.cookies
            .create_cookie(
                &self.cookie_name,
                Some(session),
                CookieOptions {
                    max_age,
                    ..Default::default()
                },
            )
            .map_err(|e| FlowError::Session(e.to_string()))
    }

    /// Cookie that removes the session
    #[must_use]
    pub fn clear_cookie(&self) -> Cookie<'static> {
        self.cookies.create_expired_cookie(&self.cookie_name)
    }
}
