use actix_web::cookie::{time::Duration, Cookie, SameSite};
use anyhow::Result;
use serde::Serialize;

use crate::utils::crypto::encrypt_data;

/// Options for cookie creation
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub max_age: Duration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            max_age: Duration::hours(1),
        }
    }
}

/// Builds encrypted cookies with consistent attributes
#[derive(Clone)]
pub struct CookieFactory {
    encryption_key: [u8; 32],
    cookie_secure: bool,
}

impl CookieFactory {
    #[must_use]
    pub fn new(encryption_key: [u8; 32], cookie_secure: bool) -> Self {
        Self {
            encryption_key,
            cookie_secure,
        }
    }

    #[must_use]
    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    /// Create a cookie whose value is `data` sealed with AES-256-GCM
    ///
    /// `None` yields an empty value.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_cookie<T: Serialize>(
        &self,
        name: &str,
        data: Option<&T>,
        options: CookieOptions,
    ) -> Result<Cookie<'static>> {
        let value = match data {
            Some(data) => encrypt_data(data, &self.encryption_key)?,
            None => String::new(),
        };

        Ok(Cookie::build(name.to_owned(), value)
            .http_only(options.http_only)
            .secure(self.cookie_secure && options.secure)
            .same_site(options.same_site)
            .path(options.path)
            .max_age(options.max_age)
            .finish())
    }

    /// Cookie that tells the user agent to drop `name`
    #[must_use]
    pub fn create_expired_cookie(&self, name: &str) -> Cookie<'static> {
        Cookie::build(name.to_owned(), "")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(Duration::ZERO)
            .finish()
    }
}
