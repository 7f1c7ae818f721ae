//! The subject of an authorization decision.

use std::fmt;

use super::session::SessionRecord;

/// Login provider recorded in the session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Local user list or LDAP directory.
    Username,
    /// Custom OIDC provider; the only one whose group claim is trusted.
    Generic,
    /// Any other OAuth provider (`github`, `google`, ...).
    Other(String),
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Username => "username",
            Self::Generic => "generic",
            Self::Other(name) => name,
        }
    }

    #[must_use]
    pub fn is_oauth(&self) -> bool {
        !matches!(self, Self::Username)
    }
}

impl From<&str> for Provider {
    fn from(value: &str) -> Self {
        match value {
            "username" => Self::Username,
            "generic" => Self::Generic,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestIdentity {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub provider: Provider,
    /// Comma separated group claim, empty when the provider supplies none.
    pub oauth_groups: String,
    pub is_oauth: bool,
}

impl RequestIdentity {
    /// Identity of a user verified with a username and password.
    #[must_use]
    pub fn from_credentials(username: &str, email_domain: &str) -> Self {
        Self {
            username: username.to_string(),
            display_name: capitalize(username),
            email: format!("{username}@{email_domain}"),
            provider: Provider::Username,
            oauth_groups: String::new(),
            is_oauth: false,
        }
    }

    #[must_use]
    pub fn groups(&self) -> Vec<&str> {
        self.oauth_groups
            .split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .collect()
    }
}

impl From<&SessionRecord> for RequestIdentity {
    fn from(record: &SessionRecord) -> Self {
        Self {
            username: record.username.clone(),
            display_name: record.display_name.clone(),
            email: record.email.clone(),
            is_oauth: record.provider.is_oauth(),
            provider: record.provider.clone(),
            oauth_groups: record.oauth_groups.clone(),
        }
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
