//! Whitelist and IP/CIDR matching used by the policy evaluator.

use ipnet::IpNet;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),
}

/// Test `value` against a comma separated whitelist of exact entries.
///
/// An empty whitelist means no restriction is configured and allows everything.
#[must_use]
pub fn check_whitelist(whitelist: &str, value: &str) -> bool {
    if whitelist.trim().is_empty() {
        return true;
    }

    whitelist
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| entry == value)
}

/// Parse a client address, unwrapping IPv4-mapped IPv6 forms.
#[must_use]
pub fn parse_client_ip(ip: &str) -> Option<IpAddr> {
    ip.trim()
        .parse::<IpAddr>()
        .ok()
        .map(|addr| addr.to_canonical())
}

/// Match one allow/block list entry (single address or CIDR block) against an address.
///
/// # Errors
/// Returns a [`FilterError`] when the entry itself cannot be parsed.
pub fn filter_ip(entry: &str, ip: Option<IpAddr>) -> Result<bool, FilterError> {
    let entry = entry.trim();

    if entry.contains('/') {
        let net = entry
            .parse::<IpNet>()
            .map_err(|_| FilterError::InvalidCidr(entry.to_string()))?;
        return Ok(ip.is_some_and(|ip| net.contains(&ip)));
    }

    let filter = entry
        .parse::<IpAddr>()
        .map_err(|_| FilterError::InvalidAddress(entry.to_string()))?
        .to_canonical();

    Ok(ip == Some(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_whitelist_allows_everything() {
        assert!(check_whitelist("", "alice"));
        assert!(check_whitelist("  ", "alice"));
    }

    #[test]
    fn whitelist_matches_exact_entries_only() {
        let whitelist = "alice, bob,carol";
        assert!(check_whitelist(whitelist, "alice"));
        assert!(check_whitelist(whitelist, "bob"));
        assert!(!check_whitelist(whitelist, "Alice"));
        assert!(!check_whitelist(whitelist, "ali"));
        assert!(!check_whitelist(whitelist, ""));
    }

    #[test]
    fn filter_ip_single_address() {
        let ip = parse_client_ip("10.0.0.5");
        assert_eq!(filter_ip("10.0.0.5", ip), Ok(true));
        assert_eq!(filter_ip("10.0.0.6", ip), Ok(false));
    }

    #[test]
    fn filter_ip_cidr_block() {
        let ip = parse_client_ip("192.168.1.42");
        assert_eq!(filter_ip("192.168.1.0/24", ip), Ok(true));
        assert_eq!(filter_ip("192.168.2.0/24", ip), Ok(false));
    }

    #[test]
    fn filter_ip_ipv6() {
        let ip = parse_client_ip("2001:db8::1");
        assert_eq!(filter_ip("2001:db8::/32", ip), Ok(true));
        assert_eq!(filter_ip("10.0.0.0/8", ip), Ok(false));
    }

    #[test]
    fn filter_ip_mapped_ipv4() {
        let ip = parse_client_ip("::ffff:10.1.2.3");
        assert_eq!(filter_ip("10.0.0.0/8", ip), Ok(true));
        assert_eq!(filter_ip("10.1.2.3", ip), Ok(true));
    }

    #[test]
    fn filter_ip_rejects_invalid_entries() {
        let ip = parse_client_ip("10.0.0.1");
        assert_eq!(
            filter_ip("10.0.0.0/99", ip),
            Err(FilterError::InvalidCidr("10.0.0.0/99".to_string()))
        );
        assert_eq!(
            filter_ip("not-an-ip", ip),
            Err(FilterError::InvalidAddress("not-an-ip".to_string()))
        );
    }

    #[test]
    fn filter_ip_unparsable_client_never_matches() {
        assert_eq!(filter_ip("10.0.0.0/8", None), Ok(false));
        assert_eq!(filter_ip("10.0.0.1", None), Ok(false));
    }
}
