use crate::auth::LdapConfig;
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_LDAP_ADDRESS: &str = "ldap-address";
pub const ARG_LDAP_BIND_DN: &str = "ldap-bind-dn";
pub const ARG_LDAP_BIND_PASSWORD: &str = "ldap-bind-password";
pub const ARG_LDAP_BASE_DN: &str = "ldap-base-dn";
pub const ARG_LDAP_SEARCH_FILTER: &str = "ldap-search-filter";
pub const ARG_LDAP_INSECURE: &str = "ldap-insecure";
pub const ARG_LDAP_TIMEOUT_SECONDS: &str = "ldap-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LDAP_ADDRESS)
                .long(ARG_LDAP_ADDRESS)
                .help("LDAP server URL, e.g. ldaps://ldap.example.com:636")
                .env("TOLLGATE_LDAP_ADDRESS")
                .requires_all([ARG_LDAP_BIND_DN, ARG_LDAP_BIND_PASSWORD, ARG_LDAP_BASE_DN]),
        )
        .arg(
            Arg::new(ARG_LDAP_BIND_DN)
                .long(ARG_LDAP_BIND_DN)
                .help("Service account DN used for searches")
                .env("TOLLGATE_LDAP_BIND_DN"),
        )
        .arg(
            Arg::new(ARG_LDAP_BIND_PASSWORD)
                .long(ARG_LDAP_BIND_PASSWORD)
                .help("Service account password")
                .env("TOLLGATE_LDAP_BIND_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_LDAP_BASE_DN)
                .long(ARG_LDAP_BASE_DN)
                .help("Base DN for user searches")
                .env("TOLLGATE_LDAP_BASE_DN"),
        )
        .arg(
            Arg::new(ARG_LDAP_SEARCH_FILTER)
                .long(ARG_LDAP_SEARCH_FILTER)
                .help("Search filter; %s is replaced by the escaped username")
                .env("TOLLGATE_LDAP_SEARCH_FILTER")
                .default_value("(uid=%s)"),
        )
        .arg(
            Arg::new(ARG_LDAP_INSECURE)
                .long(ARG_LDAP_INSECURE)
                .help("Skip TLS certificate verification")
                .env("TOLLGATE_LDAP_INSECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_LDAP_TIMEOUT_SECONDS)
                .long(ARG_LDAP_TIMEOUT_SECONDS)
                .help("Timeout for each directory operation in seconds")
                .env("TOLLGATE_LDAP_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub config: Option<LdapConfig>,
}

impl Options {
    /// Directory settings, or `None` when no LDAP address is configured.
    ///
    /// # Errors
    /// Returns an error if the address is set without the service account or base DN.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let Some(address) = matches.get_one::<String>(ARG_LDAP_ADDRESS).cloned() else {
            return Ok(Self { config: None });
        };

        let required = |name: &str| {
            matches
                .get_one::<String>(name)
                .cloned()
                .with_context(|| format!("missing required argument: --{name}"))
        };

        let config = LdapConfig::new(
            address,
            required(ARG_LDAP_BIND_DN)?,
            SecretString::from(required(ARG_LDAP_BIND_PASSWORD)?),
            required(ARG_LDAP_BASE_DN)?,
        )
        .with_search_filter(required(ARG_LDAP_SEARCH_FILTER)?)
        .with_insecure(matches.get_flag(ARG_LDAP_INSECURE))
        .with_timeout(Duration::from_secs(
            matches
                .get_one::<u64>(ARG_LDAP_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(5),
        ));

        Ok(Self {
            config: Some(config),
        })
    }
}
