//! Client-held sessions sealed into a cookie.
//!
//! Flow Overview:
//! 1) `create` seals a [`SessionRecord`] (JSON, ChaCha20-Poly1305, cookie name as
//!    AAD) and queues a `Set-Cookie` that replaces any previous session.
//! 2) `read` opens the cookie. Unreadable cookies are cleared and the read is
//!    retried once; incomplete or expired records are cleared. Every failure reads
//!    as "no session", never as an error.
//! 3) `delete` queues a clearing `Set-Cookie`.
//!
//! Sessions waiting for a second factor expire after one hour regardless of the
//! configured session TTL.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, warn};

use super::{config::AuthConfig, identity::Provider};

pub const TOTP_PENDING_TTL_SECONDS: i64 = 60 * 60;
const SEALED_PREFIX: &str = "v1.";
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session cookie")]
    Missing,
    #[error("unsupported session cookie format")]
    UnsupportedFormat,
    #[error("invalid session cookie encoding")]
    Encoding,
    #[error("session cookie failed authentication")]
    Tampered,
    #[error("invalid session payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("session field missing: {0}")]
    MissingField(&'static str),
    #[error("failed to seal session")]
    Seal,
}

/// A decoded, complete session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub provider: Provider,
    /// Unix timestamp (seconds).
    pub expires_at: i64,
    pub totp_pending: bool,
    pub oauth_groups: String,
}

/// Fields supplied by a successful primary authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionData {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub provider: Provider,
    pub totp_pending: bool,
    pub oauth_groups: String,
}

impl From<&SessionRecord> for SessionData {
    fn from(record: &SessionRecord) -> Self {
        Self {
            username: record.username.clone(),
            display_name: record.display_name.clone(),
            email: record.email.clone(),
            provider: record.provider.clone(),
            totp_pending: record.totp_pending,
            oauth_groups: record.oauth_groups.clone(),
        }
    }
}

/// Wire form of the sealed payload; every field is optional so an incomplete
/// cookie decodes and is rejected in one place.
#[derive(Serialize, Deserialize, Default)]
struct SessionClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<i64>,
    #[serde(
        default,
        rename = "totpPending",
        skip_serializing_if = "Option::is_none"
    )]
    totp_pending: Option<bool>,
    #[serde(
        default,
        rename = "oauthGroups",
        skip_serializing_if = "Option::is_none"
    )]
    oauth_groups: Option<String>,
}

impl From<&SessionRecord> for SessionClaims {
    fn from(record: &SessionRecord) -> Self {
        Self {
            username: Some(record.username.clone()),
            name: Some(record.display_name.clone()),
            email: Some(record.email.clone()),
            provider: Some(record.provider.as_str().to_string()),
            expiry: Some(record.expires_at),
            totp_pending: Some(record.totp_pending),
            oauth_groups: Some(record.oauth_groups.clone()),
        }
    }
}

impl TryFrom<SessionClaims> for SessionRecord {
    type Error = SessionError;

    fn try_from(claims: SessionClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            username: claims.username.ok_or(SessionError::MissingField("username"))?,
            display_name: claims.name.ok_or(SessionError::MissingField("name"))?,
            email: claims.email.ok_or(SessionError::MissingField("email"))?,
            provider: claims
                .provider
                .as_deref()
                .map(Provider::from)
                .ok_or(SessionError::MissingField("provider"))?,
            expires_at: claims.expiry.ok_or(SessionError::MissingField("expiry"))?,
            totp_pending: claims
                .totp_pending
                .ok_or(SessionError::MissingField("totpPending"))?,
            oauth_groups: claims
                .oauth_groups
                .ok_or(SessionError::MissingField("oauthGroups"))?,
        })
    }
}

/// The session cookie of one request, plus the `Set-Cookie` to send back.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    value: Option<String>,
    set_cookie: Option<String>,
}

impl CookieJar {
    #[must_use]
    pub fn new(value: Option<String>) -> Self {
        Self {
            value,
            set_cookie: None,
        }
    }

    /// Pick the named cookie out of a `Cookie` request header.
    #[must_use]
    pub fn from_header(header: Option<&str>, name: &str) -> Self {
        Self::new(header.and_then(|header| cookie_value(header, name)))
    }

    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// `Set-Cookie` value queued by the last create or delete.
    #[must_use]
    pub fn set_cookie(&self) -> Option<&str> {
        self.set_cookie.as_deref()
    }

    pub fn take_set_cookie(&mut self) -> Option<String> {
        self.set_cookie.take()
    }

    fn store(&mut self, value: String, set_cookie: String) {
        self.value = Some(value);
        self.set_cookie = Some(set_cookie);
    }

    fn clear(&mut self, set_cookie: String) {
        self.value = None;
        self.set_cookie = Some(set_cookie);
    }
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

pub struct SessionManager {
    key: [u8; 32],
    cookie_name: String,
    cookie_domain: String,
    cookie_secure: bool,
    session_ttl_seconds: i64,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            key: derive_key(config),
            cookie_name: config.cookie_name().to_string(),
            cookie_domain: config.cookie_domain().to_string(),
            cookie_secure: config.cookie_secure(),
            session_ttl_seconds: config.session_ttl_seconds(),
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Build the jar for a request from its `Cookie` header.
    #[must_use]
    pub fn jar(&self, cookie_header: Option<&str>) -> CookieJar {
        CookieJar::from_header(cookie_header, &self.cookie_name)
    }

    /// Seal a new session into the jar, replacing any previous one.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized or sealed.
    pub fn create(
        &self,
        jar: &mut CookieJar,
        data: SessionData,
    ) -> Result<SessionRecord, SessionError> {
        self.create_at(jar, data, Utc::now().timestamp())
    }

    /// [`Self::create`] with an explicit clock, in Unix seconds.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized or sealed.
    pub fn create_at(
        &self,
        jar: &mut CookieJar,
        data: SessionData,
        now: i64,
    ) -> Result<SessionRecord, SessionError> {
        debug!("Creating session cookie");

        let ttl = if data.totp_pending {
            TOTP_PENDING_TTL_SECONDS
        } else {
            self.session_ttl_seconds
        };

        let record = SessionRecord {
            username: data.username,
            display_name: data.display_name,
            email: data.email,
            provider: data.provider,
            expires_at: now.saturating_add(ttl),
            totp_pending: data.totp_pending,
            oauth_groups: data.oauth_groups,
        };

        let sealed = self.seal(&SessionClaims::from(&record))?;
        let set_cookie = self.cookie_header(&sealed, self.session_ttl_seconds);
        jar.store(sealed, set_cookie);

        Ok(record)
    }

    /// Read the session from the jar; `None` means "not authenticated".
    pub fn read(&self, jar: &mut CookieJar) -> Option<SessionRecord> {
        self.read_at(jar, Utc::now().timestamp())
    }

    /// [`Self::read`] with an explicit clock, in Unix seconds.
    pub fn read_at(&self, jar: &mut CookieJar, now: i64) -> Option<SessionRecord> {
        if jar.value().is_none() {
            return None;
        }

        let claims = match self.decode(jar) {
            Ok(claims) => claims,
            Err(err) => {
                warn!("Invalid session, clearing cookie and retrying: {err}");
                self.delete(jar);
                match self.decode(jar) {
                    Ok(claims) => claims,
                    Err(err) => {
                        debug!("Session unreadable after clearing cookie: {err}");
                        return None;
                    }
                }
            }
        };

        let record = match SessionRecord::try_from(claims) {
            Ok(record) => record,
            Err(err) => {
                warn!("Session cookie is invalid: {err}");
                self.delete(jar);
                return None;
            }
        };

        if now >= record.expires_at {
            warn!(username = %record.username, "Session cookie expired");
            self.delete(jar);
            return None;
        }

        debug!(
            username = %record.username,
            provider = %record.provider,
            expiry = record.expires_at,
            totp_pending = record.totp_pending,
            "Parsed session cookie"
        );

        Some(record)
    }

    /// Clear the session; calling it again is harmless.
    pub fn delete(&self, jar: &mut CookieJar) {
        debug!("Deleting session cookie");
        jar.clear(self.cookie_header("", 0));
    }

    fn decode(&self, jar: &CookieJar) -> Result<SessionClaims, SessionError> {
        let value = jar.value().ok_or(SessionError::Missing)?;
        self.open(value)
    }

    #[allow(deprecated)]
    fn seal(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        let plaintext = serde_json::to_vec(claims)?;
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| SessionError::Seal)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let payload = Payload {
            msg: &plaintext,
            aad: self.cookie_name.as_bytes(),
        };
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|_| SessionError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{SEALED_PREFIX}{}", URL_SAFE_NO_PAD.encode(sealed)))
    }

    #[allow(deprecated)]
    fn open(&self, value: &str) -> Result<SessionClaims, SessionError> {
        let encoded = value
            .strip_prefix(SEALED_PREFIX)
            .ok_or(SessionError::UnsupportedFormat)?;
        let data = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| SessionError::Encoding)?;
        if data.len() <= NONCE_LEN {
            return Err(SessionError::Encoding);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher =
            ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| SessionError::Tampered)?;
        let payload = Payload {
            msg: ciphertext,
            aad: self.cookie_name.as_bytes(),
        };
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| SessionError::Tampered)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn cookie_header(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax",
            self.cookie_name
        );
        if !self.cookie_domain.is_empty() {
            cookie.push_str(&format!("; Domain=.{}", self.cookie_domain));
        }
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("key", &"***")
            .field("cookie_name", &self.cookie_name)
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_secure", &self.cookie_secure)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .finish()
    }
}

fn derive_key(config: &AuthConfig) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"tollgate-session:v1");
    for secret in [config.hmac_secret(), config.encryption_secret()] {
        let secret = secret.expose_secret().as_bytes();
        hasher.update((secret.len() as u64).to_be_bytes());
        hasher.update(secret);
    }
    hasher.finalize().into()
}
