//! Static local users.
//!
//! Entries are `username:bcrypt_hash[:totp_secret]`, separated by commas on the
//! command line or one per line in a users file. `$$` is accepted as an escaped `$`
//! so hashes survive compose-file interpolation.

use secrecy::SecretString;
use std::{fmt, fs, path::Path};

#[derive(Debug, thiserror::Error)]
pub enum UsersError {
    #[error("invalid user entry at position {0}: expected username:hash[:totp_secret]")]
    InvalidEntry(usize),
    #[error("duplicate user: {0}")]
    Duplicate(String),
    #[error("failed to read users file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub totp_secret: Option<SecretString>,
}

impl User {
    #[must_use]
    pub fn has_totp(&self) -> bool {
        self.totp_secret.is_some()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password_hash", &"***")
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Parse a list of user entries separated by commas or newlines.
///
/// # Errors
/// Returns an error for malformed entries or duplicated usernames.
pub fn parse_users(input: &str) -> Result<Vec<User>, UsersError> {
    let mut users: Vec<User> = Vec::new();

    let entries = input
        .split([',', '\n'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with('#'));

    for (index, entry) in entries.enumerate() {
        let user = parse_entry(entry).ok_or(UsersError::InvalidEntry(index + 1))?;
        if users.iter().any(|u| u.username == user.username) {
            return Err(UsersError::Duplicate(user.username));
        }
        users.push(user);
    }

    Ok(users)
}

/// Read users from a file and append the inline entries.
///
/// # Errors
/// Returns an error if the file cannot be read or any entry is invalid.
pub fn load_users(inline: Option<&str>, file: Option<&Path>) -> Result<Vec<User>, UsersError> {
    let mut combined = String::new();

    if let Some(path) = file {
        combined = fs::read_to_string(path).map_err(|source| UsersError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }

    if let Some(inline) = inline {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(inline);
    }

    parse_users(&combined)
}

fn parse_entry(entry: &str) -> Option<User> {
    let entry = entry.replace("$$", "$");
    let mut parts = entry.split(':');

    let username = parts.next()?.trim();
    let password_hash = parts.next()?.trim();
    let totp_secret = parts.next().map(str::trim).filter(|s| !s.is_empty());

    if username.is_empty() || password_hash.is_empty() || parts.next().is_some() {
        return None;
    }

    Some(User {
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        totp_secret: totp_secret.map(|s| SecretString::from(s.to_string())),
    })
}
