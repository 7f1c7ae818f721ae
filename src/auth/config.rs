//! Auth configuration shared by the session manager, rate limiter and engine.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

const DEFAULT_COOKIE_NAME: &str = "tollgate_session";
const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_LOGIN_MAX_RETRIES: i64 = 5;
const DEFAULT_LOGIN_TIMEOUT_SECONDS: i64 = 5 * 60;
const MIN_SECRET_LENGTH: usize = 32;
/// Upper bound for the session TTL and the lockout window (ten years).
pub const MAX_WINDOW_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be at least {MIN_SECRET_LENGTH} characters")]
    SecretTooShort(&'static str),
    #[error("{name} must be between {min} and {MAX_WINDOW_SECONDS} seconds, got {value}")]
    OutOfRange {
        name: &'static str,
        min: i64,
        value: i64,
    },
}

#[derive(Clone)]
pub struct AuthConfig {
    hmac_secret: SecretString,
    encryption_secret: SecretString,
    cookie_name: String,
    cookie_domain: String,
    cookie_secure: bool,
    session_ttl_seconds: i64,
    login_max_retries: i64,
    login_timeout_seconds: i64,
    oauth_whitelist: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(hmac_secret: SecretString, encryption_secret: SecretString) -> Self {
        Self {
            hmac_secret,
            encryption_secret,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_domain: String::new(),
            cookie_secure: false,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            login_max_retries: DEFAULT_LOGIN_MAX_RETRIES,
            login_timeout_seconds: DEFAULT_LOGIN_TIMEOUT_SECONDS,
            oauth_whitelist: String::new(),
        }
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: String) -> Self {
        self.cookie_name = name;
        self
    }

    /// Parent domain of the protected services, e.g. `example.com`.
    #[must_use]
    pub fn with_cookie_domain(mut self, domain: String) -> Self {
        self.cookie_domain = domain.trim_start_matches('.').to_string();
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_max_retries(mut self, retries: i64) -> Self {
        self.login_max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_login_timeout_seconds(mut self, seconds: i64) -> Self {
        self.login_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_oauth_whitelist(mut self, whitelist: String) -> Self {
        self.oauth_whitelist = whitelist;
        self
    }

    /// Check the secrets are long enough to derive a session key from and that
    /// every time window fits in a timestamp.
    ///
    /// # Errors
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hmac_secret.expose_secret().len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::SecretTooShort("session HMAC secret"));
        }
        if self.encryption_secret.expose_secret().len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::SecretTooShort("session encryption secret"));
        }
        check_window("session TTL", 1, self.session_ttl_seconds)?;
        // Zero or negative disables lockout.
        check_window("login timeout", i64::MIN, self.login_timeout_seconds)?;
        Ok(())
    }

    pub(super) fn hmac_secret(&self) -> &SecretString {
        &self.hmac_secret
    }

    pub(super) fn encryption_secret(&self) -> &SecretString {
        &self.encryption_secret
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn cookie_domain(&self) -> &str {
        &self.cookie_domain
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn login_max_retries(&self) -> i64 {
        self.login_max_retries
    }

    #[must_use]
    pub fn login_timeout_seconds(&self) -> i64 {
        self.login_timeout_seconds
    }

    #[must_use]
    pub fn oauth_whitelist(&self) -> &str {
        &self.oauth_whitelist
    }
}

fn check_window(name: &'static str, min: i64, value: i64) -> Result<(), ConfigError> {
    if (min..=MAX_WINDOW_SECONDS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, min, value })
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("hmac_secret", &"***")
            .field("encryption_secret", &"***")
            .field("cookie_name", &self.cookie_name)
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_secure", &self.cookie_secure)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("login_max_retries", &self.login_max_retries)
            .field("login_timeout_seconds", &self.login_timeout_seconds)
            .field("oauth_whitelist", &self.oauth_whitelist)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AuthConfig {
    AuthConfig::new(
        SecretString::from("h".repeat(32)),
        SecretString::from("e".repeat(32)),
    )
    .with_cookie_domain("example.com".to_string())
    .with_session_ttl_seconds(7200)
    .with_login_max_retries(3)
    .with_login_timeout_seconds(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AuthConfig::new(
            SecretString::from("a".to_string()),
            SecretString::from("b".to_string()),
        );
        assert_eq!(config.cookie_name(), "tollgate_session");
        assert_eq!(config.session_ttl_seconds(), 86_400);
        assert_eq!(config.login_max_retries(), 5);
        assert_eq!(config.login_timeout_seconds(), 300);
        assert!(!config.cookie_secure());
    }

    #[test]
    fn cookie_domain_strips_leading_dot() {
        let config = test_config().with_cookie_domain(".example.org".to_string());
        assert_eq!(config.cookie_domain(), "example.org");
    }

    #[test]
    fn validate_rejects_short_secrets() {
        let config = AuthConfig::new(
            SecretString::from("short".to_string()),
            SecretString::from("e".repeat(32)),
        );
        assert!(config.validate().is_err());
        assert!(test_config().validate().is_ok());
        assert_eq!(
            config.validate(),
            Err(ConfigError::SecretTooShort("session HMAC secret"))
        );
    }

    #[test]
    fn validate_bounds_session_ttl() {
        assert!(test_config().with_session_ttl_seconds(0).validate().is_err());
        assert!(test_config()
            .with_session_ttl_seconds(MAX_WINDOW_SECONDS)
            .validate()
            .is_ok());
        assert_eq!(
            test_config()
                .with_session_ttl_seconds(i64::MAX)
                .validate(),
            Err(ConfigError::OutOfRange {
                name: "session TTL",
                min: 1,
                value: i64::MAX,
            })
        );
    }

    #[test]
    fn validate_bounds_login_timeout() {
        assert!(test_config().with_login_timeout_seconds(0).validate().is_ok());
        assert!(test_config()
            .with_login_timeout_seconds(MAX_WINDOW_SECONDS)
            .validate()
            .is_ok());
        let err = test_config()
            .with_login_timeout_seconds(10_000_000_000_000)
            .validate();
        assert!(matches!(
            err,
            Err(ConfigError::OutOfRange { name: "login timeout", .. })
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let debug = format!("{:?}", test_config());
        assert!(!debug.contains(&"h".repeat(32)));
        assert!(!debug.contains(&"e".repeat(32)));
    }
}
