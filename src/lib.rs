//! # Tollgate (forward authentication)
//!
//! `tollgate` sits behind a reverse proxy and answers one question per request:
//! may this request reach the protected service?
//!
//! ## Identity
//!
//! A request is authenticated by an encrypted session cookie, by HTTP basic
//! credentials, or not at all. Credentials are checked against a static list of
//! local users (bcrypt hashes) first and an LDAP directory second. Local users may
//! carry a TOTP secret; their sessions stay in a short-lived pending state until the
//! second factor is verified.
//!
//! ## Sessions
//!
//! Sessions are client-held: the record is sealed with ChaCha20-Poly1305 into the
//! cookie and nothing is stored server-side. An unreadable, incomplete or expired
//! cookie is treated as "no session" and cleared.
//!
//! ## Brute-force protection
//!
//! Failed logins are counted per username and per client IP. Reaching the
//! configured maximum locks the identifier for the lockout window, and a locked
//! identifier is rejected before any credential check runs.
//!
//! ## Authorization
//!
//! Each resource carries a policy: IP allow/block lists (block wins), a URI
//! pattern that bypasses authentication, a username whitelist, an OAuth email
//! whitelist and required OAuth groups. Failures surface only as `401` or `403`.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
