//! Transport-neutral cookie shape exchanged with the cookie hooks

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    /// Leave the attribute off and let the client decide
    #[default]
    Default,
    Lax,
    Strict,
    None,
}

/// The external token carrying a session identifier.
///
/// Produced by the core for the write hook and expected back from the read
/// hook. `max_age` follows the HTTP convention: a negative value means
/// "delete now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
}

impl Cookie {
    /// Build the cookie that points a client at session `id`
    pub fn for_session(options: &CookieOptions, id: &str) -> Self {
        Self {
            name: options.name.clone(),
            value: id.to_string(),
            domain: options.domain.clone(),
            path: options.path.clone(),
            secure: options.secure,
            http_only: options.http_only,
            same_site: options.same_site,
            expires: options.expires,
            max_age: options.max_age.map(|d| d.as_secs() as i64),
        }
    }

    /// Build an already-expired cookie that makes the client drop its token
    pub fn expired(options: &CookieOptions) -> Self {
        Self {
            value: String::new(),
            expires: Some(DateTime::<Utc>::UNIX_EPOCH),
            max_age: Some(-1),
            ..Self::for_session(options, "")
        }
    }

    pub fn is_expired(&self) -> bool {
        self.max_age.is_some_and(|age| age < 0)
            || self.expires.is_some_and(|at| at <= Utc::now())
    }
}

/// Attributes applied to every cookie the manager writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    pub name: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// Absolute expiry; `None` makes a browser-session cookie
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<Duration>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: "session".to_string(),
            domain: None,
            path: "/".to_string(),
            secure: false,
            http_only: true,
            same_site: SameSite::Default,
            expires: None,
            max_age: None,
        }
    }
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CookieOptions::default();
        assert_eq!(options.name, "session");
        assert_eq!(options.path, "/");
        assert!(options.http_only);
        assert!(!options.secure);
        assert_eq!(options.same_site, SameSite::Default);
    }

    #[test]
    fn test_for_session_copies_attributes() {
        let options = CookieOptions::new()
            .with_name("sid")
            .with_domain("example.com")
            .with_secure(true)
            .with_same_site(SameSite::Strict)
            .with_max_age(Duration::from_secs(3600));

        let cookie = Cookie::for_session(&options, "abc");

        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, SameSite::Strict);
        assert_eq!(cookie.max_age, Some(3600));
        assert!(!cookie.is_expired());
    }

    #[test]
    fn test_expired_cookie() {
        let options = CookieOptions::new().with_name("sid");
        let cookie = Cookie::expired(&options);

        assert_eq!(cookie.name, "sid");
        assert!(cookie.value.is_empty());
        assert!(cookie.is_expired());
        assert_eq!(cookie.expires, Some(DateTime::<Utc>::UNIX_EPOCH));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: CookieOptions =
            serde_json::from_str(r#"{"name": "sid", "same_site": "lax"}"#).unwrap();

        assert_eq!(options.name, "sid");
        assert_eq!(options.same_site, SameSite::Lax);
        assert_eq!(options.path, "/");
        assert!(options.http_only);
    }
}
