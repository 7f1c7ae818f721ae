//! Per-resource access policy and its evaluation.
//!
//! Flow Overview:
//! 1) `check_ip`: block list, then allow list; a non-empty allow list without a
//!    match denies.
//! 2) `bypassed`: a URI matching `allowed_uri_pattern` skips authentication.
//! 3) `resource_allowed`: email whitelist for OAuth identities, username
//!    whitelist otherwise.
//! 4) `oauth_group_allowed`: any identity group in `required_groups`, enforced
//!    only for the generic OIDC provider.
//!
//! Policies are plain data; where they come from is up to the caller. The CLI
//! loads a [`PolicySet`] from a JSON file.

use regex::Regex;
use serde::Deserialize;
use std::{collections::HashMap, fs, net::IpAddr, path::Path};
use tracing::{debug, warn};

use super::{
    identity::{Provider, RequestIdentity},
    matchers::{check_whitelist, filter_ip},
};

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OAuthPolicy {
    /// Comma separated emails allowed to reach the resource.
    pub email_whitelist: String,
    /// Comma separated groups, any of which grants access.
    pub required_groups: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IpPolicy {
    pub allow: Vec<String>,
    pub block: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Regex matched against the forwarded URI; a match skips authentication.
    pub allowed_uri_pattern: String,
    pub user_whitelist: String,
    pub oauth: OAuthPolicy,
    pub ip: IpPolicy,
}

/// Evaluate the client address against the IP lists; block wins over allow.
#[must_use]
pub fn check_ip(client_ip: Option<IpAddr>, policy: &IpPolicy) -> bool {
    let ip = client_ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());

    for blocked in &policy.block {
        match filter_ip(blocked, client_ip) {
            Ok(true) => {
                warn!(ip, item = %blocked, "IP is in block list, denying access");
                return false;
            }
            Ok(false) => {}
            Err(err) => warn!(item = %blocked, "Invalid IP/CIDR in block list: {err}"),
        }
    }

    for allowed in &policy.allow {
        match filter_ip(allowed, client_ip) {
            Ok(true) => {
                debug!(ip, item = %allowed, "IP is in allow list, allowing access");
                return true;
            }
            Ok(false) => {}
            Err(err) => warn!(item = %allowed, "Invalid IP/CIDR in allow list: {err}"),
        }
    }

    if !policy.allow.is_empty() {
        warn!(ip, "IP not in allow list, denying access");
        return false;
    }

    debug!(ip, "IP not in allow or block list, allowing by default");
    true
}

/// Whether `uri` skips authentication.
///
/// # Errors
/// Returns the compile error of an invalid pattern; callers should then
/// require authentication.
pub fn bypassed(uri: &str, pattern: &str) -> Result<bool, regex::Error> {
    if pattern.is_empty() {
        return Ok(false);
    }
    Ok(Regex::new(pattern)?.is_match(uri))
}

#[must_use]
pub fn resource_allowed(identity: &RequestIdentity, policy: &ResourcePolicy) -> bool {
    if identity.is_oauth {
        debug!(email = %identity.email, "Checking OAuth email whitelist");
        return check_whitelist(&policy.oauth.email_whitelist, &identity.email);
    }

    debug!(username = %identity.username, "Checking user whitelist");
    check_whitelist(&policy.user_whitelist, &identity.username)
}

#[must_use]
pub fn oauth_group_allowed(identity: &RequestIdentity, policy: &ResourcePolicy) -> bool {
    let required = &policy.oauth.required_groups;
    if required.trim().is_empty() {
        return true;
    }

    if identity.provider != Provider::Generic {
        debug!(provider = %identity.provider, "Group claim not trusted for provider, skipping group check");
        return true;
    }

    let allowed = identity
        .groups()
        .into_iter()
        .any(|group| check_whitelist(required, group));

    if !allowed {
        debug!(username = %identity.username, "User is not in any required group");
    }
    allowed
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid policy file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid allowed_uri_pattern for {resource}: {source}")]
    Pattern {
        resource: String,
        source: regex::Error,
    },
}

/// Static policies: a default plus per-host overrides.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicySet {
    pub default: ResourcePolicy,
    pub hosts: HashMap<String, ResourcePolicy>,
}

impl PolicySet {
    /// Parse a policy set from JSON.
    ///
    /// Bypass patterns are compiled once here so a typo is reported at startup;
    /// an invalid pattern is still handled safely at request time.
    ///
    /// # Errors
    /// Returns an error for malformed JSON or an invalid bypass pattern.
    pub fn from_json(input: &str) -> Result<Self, PolicyError> {
        let set: Self = serde_json::from_str(input)?;

        let resources = std::iter::once(("default", &set.default))
            .chain(set.hosts.iter().map(|(host, policy)| (host.as_str(), policy)));
        for (resource, policy) in resources {
            bypassed("", &policy.allowed_uri_pattern).map_err(|source| PolicyError::Pattern {
                resource: resource.to_string(),
                source,
            })?;
        }

        Ok(set)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let input = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&input)
    }

    /// Policy for a forwarded host: exact host, then its first label, then the default.
    #[must_use]
    pub fn for_host(&self, host: &str) -> &ResourcePolicy {
        let host = strip_port(host).to_ascii_lowercase();
        if let Some(policy) = self.hosts.get(&host) {
            return policy;
        }
        host.split('.')
            .next()
            .and_then(|label| self.hosts.get(label))
            .unwrap_or(&self.default)
    }
}

/// Drop a `:port` suffix, keeping bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    host.split(':').next().unwrap_or(host)
}
