//! Forward-auth decisions and the login flows that feed them.
//!
//! Flow Overview:
//! 1) `authorize` runs the IP lists, the bypass pattern, authentication and the
//!    resource whitelists, in that order, for one proxied request.
//! 2) `authenticate` prefers a live, fully verified session and falls back to
//!    HTTP basic credentials. Basic auth never issues a cookie.
//! 3) `login` and `verify_totp` check credentials behind the rate limiter and
//!    create the session cookie; `oauth_login` does the same for identities
//!    produced by an external OAuth flow.
//!
//! Locks are checked before any credential work, so a locked account fails even
//! with the right password. Failures are charged to both the username and the
//! client IP.

use secrecy::{ExposeSecret, SecretString};
use std::{fmt, net::IpAddr};
use tracing::{debug, info, warn};

use super::{
    config::AuthConfig,
    credentials::{CredentialStore, IdentityKind},
    identity::{Provider, RequestIdentity},
    matchers::check_whitelist,
    policy::{self, ResourcePolicy},
    rate_limit::{LockStatus, RateLimiter},
    session::{CookieJar, SessionData, SessionError, SessionManager},
    totp,
};

const FALLBACK_EMAIL_DOMAIN: &str = "localhost";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Locked { remaining_seconds: u64 },
    Failed,
    /// Password accepted; a pending session waits for the second factor.
    TotpRequired,
    Success,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TotpOutcome {
    Locked { remaining_seconds: u64 },
    /// No session waiting for a second factor.
    NotPending,
    Invalid,
    Success,
}

/// Claims handed over by a completed OAuth flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthIdentity {
    /// Preferred username; the email local part is used when absent.
    pub username: Option<String>,
    pub name: String,
    pub email: String,
    pub provider: Provider,
    /// Comma separated group claim.
    pub groups: String,
}

#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: SecretString,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// What the proxy tells us about a request.
#[derive(Clone, Debug, Default)]
pub struct ForwardRequest {
    pub uri: String,
    pub client_ip: Option<IpAddr>,
    pub basic: Option<BasicCredentials>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    IpNotAllowed,
    NotWhitelisted,
    MissingGroup,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IpNotAllowed => "ip not allowed",
            Self::NotWhitelisted => "user not allowed",
            Self::MissingGroup => "group not allowed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// `identity` is `None` when the URI bypasses authentication.
    Allow { identity: Option<RequestIdentity> },
    Unauthorized,
    Forbidden { reason: DenyReason },
}

#[derive(Debug)]
pub struct AuthEngine {
    config: AuthConfig,
    sessions: SessionManager,
    credentials: CredentialStore,
    limiter: RateLimiter,
}

impl AuthEngine {
    #[must_use]
    pub fn new(config: AuthConfig, credentials: CredentialStore) -> Self {
        Self {
            sessions: SessionManager::new(&config),
            limiter: RateLimiter::new(config.login_max_retries(), config.login_timeout_seconds()),
            credentials,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Verify a username and password and start a session.
    ///
    /// # Errors
    /// Returns an error only when the session cookie cannot be sealed.
    pub async fn login(
        &self,
        jar: &mut CookieJar,
        username: &str,
        password: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<LoginOutcome, SessionError> {
        // Reading clears a stale or tampered cookie even when the login fails.
        if self.sessions.read(jar).is_some() {
            debug!(username, "Login replaces an existing session");
        }

        let status = self.lock_status(username, client_ip).await;
        if let LockStatus::Locked { remaining_seconds } = status {
            warn!(username, remaining_seconds, "Login rejected, account or IP is locked");
            return Ok(LoginOutcome::Locked { remaining_seconds });
        }

        let search = self.credentials.search(username).await;
        let verified = self.credentials.verify(&search, password).await;
        self.record_attempt(username, client_ip, verified).await;

        if !verified {
            warn!(username, "Invalid username or password");
            return Ok(LoginOutcome::Failed);
        }

        let totp_pending = search.kind == IdentityKind::Local
            && self
                .credentials
                .local_user(username)
                .is_some_and(|user| user.has_totp());

        let identity = RequestIdentity::from_credentials(username, self.email_domain());
        self.sessions.create(
            jar,
            SessionData {
                username: identity.username,
                display_name: identity.display_name,
                email: identity.email,
                provider: Provider::Username,
                totp_pending,
                oauth_groups: String::new(),
            },
        )?;

        if totp_pending {
            info!(username, "Password accepted, waiting for TOTP code");
            Ok(LoginOutcome::TotpRequired)
        } else {
            info!(username, "Login successful");
            Ok(LoginOutcome::Success)
        }
    }

    /// Complete a pending login with a TOTP code.
    ///
    /// # Errors
    /// Returns an error only when the upgraded session cannot be sealed.
    pub async fn verify_totp(
        &self,
        jar: &mut CookieJar,
        code: &str,
    ) -> Result<TotpOutcome, SessionError> {
        let Some(record) = self.sessions.read(jar) else {
            return Ok(TotpOutcome::NotPending);
        };
        if !record.totp_pending {
            debug!(username = %record.username, "Session is not waiting for a TOTP code");
            return Ok(TotpOutcome::NotPending);
        }

        let status = self.limiter.is_locked(&record.username).await;
        if let LockStatus::Locked { remaining_seconds } = status {
            warn!(username = %record.username, remaining_seconds, "TOTP rejected, account is locked");
            return Ok(TotpOutcome::Locked { remaining_seconds });
        }

        let valid = self
            .credentials
            .local_user(&record.username)
            .and_then(|user| user.totp_secret.as_ref())
            .is_some_and(|secret| totp::verify_code(secret, code));
        self.limiter.record_attempt(&record.username, valid).await;

        if !valid {
            warn!(username = %record.username, "Invalid TOTP code");
            return Ok(TotpOutcome::Invalid);
        }

        let mut data = SessionData::from(&record);
        data.totp_pending = false;
        self.sessions.create(jar, data)?;

        info!(username = %record.username, "TOTP verified, login complete");
        Ok(TotpOutcome::Success)
    }

    /// Start a session for an identity produced by an OAuth flow.
    ///
    /// Returns `false` when the email is not on the deployment-wide whitelist.
    ///
    /// # Errors
    /// Returns an error only when the session cookie cannot be sealed.
    pub fn oauth_login(
        &self,
        jar: &mut CookieJar,
        identity: OAuthIdentity,
    ) -> Result<bool, SessionError> {
        if !self.email_whitelisted(&identity.email) {
            warn!(email = %identity.email, "Email not whitelisted for OAuth login");
            return Ok(false);
        }

        let username = identity.username.unwrap_or_else(|| {
            identity
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string()
        });

        self.sessions.create(
            jar,
            SessionData {
                username,
                display_name: identity.name,
                email: identity.email,
                provider: identity.provider,
                totp_pending: false,
                oauth_groups: identity.groups,
            },
        )?;
        Ok(true)
    }

    #[must_use]
    pub fn email_whitelisted(&self, email: &str) -> bool {
        check_whitelist(self.config.oauth_whitelist(), email)
    }

    pub fn logout(&self, jar: &mut CookieJar) {
        self.sessions.delete(jar);
    }

    /// Resolve the identity behind a request, if any.
    pub async fn authenticate(
        &self,
        jar: &mut CookieJar,
        basic: Option<&BasicCredentials>,
        client_ip: Option<IpAddr>,
    ) -> Option<RequestIdentity> {
        if let Some(record) = self.sessions.read(jar) {
            if !record.totp_pending {
                return Some(RequestIdentity::from(&record));
            }
            debug!(username = %record.username, "Session still waiting for TOTP code");
        }

        self.verify_basic(basic?, client_ip).await
    }

    /// The forward-auth decision for one request.
    pub async fn authorize(
        &self,
        jar: &mut CookieJar,
        request: &ForwardRequest,
        policy: &ResourcePolicy,
    ) -> Decision {
        if !policy::check_ip(request.client_ip, &policy.ip) {
            return Decision::Forbidden {
                reason: DenyReason::IpNotAllowed,
            };
        }

        match policy::bypassed(&request.uri, &policy.allowed_uri_pattern) {
            Ok(true) => {
                debug!(uri = %request.uri, "URI bypasses authentication");
                return Decision::Allow { identity: None };
            }
            Ok(false) => {}
            Err(err) => warn!("Invalid bypass pattern, requiring authentication: {err}"),
        }

        let Some(identity) = self
            .authenticate(jar, request.basic.as_ref(), request.client_ip)
            .await
        else {
            return Decision::Unauthorized;
        };

        if !policy::resource_allowed(&identity, policy) {
            warn!(username = %identity.username, "User not allowed to access resource");
            return Decision::Forbidden {
                reason: DenyReason::NotWhitelisted,
            };
        }

        if identity.is_oauth && !policy::oauth_group_allowed(&identity, policy) {
            warn!(username = %identity.username, "User not in required groups");
            return Decision::Forbidden {
                reason: DenyReason::MissingGroup,
            };
        }

        Decision::Allow {
            identity: Some(identity),
        }
    }

    async fn verify_basic(
        &self,
        basic: &BasicCredentials,
        client_ip: Option<IpAddr>,
    ) -> Option<RequestIdentity> {
        let username = basic.username.as_str();

        if self.lock_status(username, client_ip).await.is_locked() {
            warn!(username, "Basic auth rejected, account or IP is locked");
            return None;
        }

        let search = self.credentials.search(username).await;
        let verified = self
            .credentials
            .verify(&search, basic.password.expose_secret())
            .await;
        self.record_attempt(username, client_ip, verified).await;

        if !verified {
            warn!(username, "Invalid basic auth credentials");
            return None;
        }

        if self
            .credentials
            .local_user(username)
            .is_some_and(|user| user.has_totp())
        {
            warn!(username, "User has TOTP enabled, basic auth not allowed");
            return None;
        }

        Some(RequestIdentity::from_credentials(
            username,
            self.email_domain(),
        ))
    }

    async fn lock_status(&self, username: &str, client_ip: Option<IpAddr>) -> LockStatus {
        let status = self.limiter.is_locked(username).await;
        match client_ip {
            Some(ip) => status.max(self.limiter.is_locked(&ip.to_string()).await),
            None => status,
        }
    }

    async fn record_attempt(&self, username: &str, client_ip: Option<IpAddr>, success: bool) {
        self.limiter.record_attempt(username, success).await;
        if let Some(ip) = client_ip {
            self.limiter.record_attempt(&ip.to_string(), success).await;
        }
    }

    fn email_domain(&self) -> &str {
        match self.config.cookie_domain() {
            "" => FALLBACK_EMAIL_DOMAIN,
            domain => domain,
        }
    }
}
