//! Second-factor codes for local users (RFC 6238, SHA-1, 6 digits, 30 s step).

use secrecy::{ExposeSecret, SecretString};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::warn;

const ISSUER: &str = "tollgate";

fn totp(secret: &SecretString) -> Option<TOTP> {
    let bytes = match Secret::Encoded(secret.expose_secret().trim().to_uppercase()).to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Invalid TOTP secret: {err:?}");
            return None;
        }
    };

    // Secrets shorter than 128 bits are accepted.
    Some(TOTP::new_unchecked(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some(ISSUER.to_string()),
        "user".to_string(),
    ))
}

/// Check a code against the current time step, allowing one step of skew.
#[must_use]
pub fn verify_code(secret: &SecretString, code: &str) -> bool {
    totp(secret).is_some_and(|totp| totp.check_current(code.trim()).unwrap_or(false))
}

#[must_use]
pub fn verify_code_at(secret: &SecretString, code: &str, unix_seconds: u64) -> bool {
    totp(secret).is_some_and(|totp| totp.check(code.trim(), unix_seconds))
}
