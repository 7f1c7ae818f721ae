//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to an action, loading the user list and the
//! policy file on the way.

use crate::auth::{load_users, PolicySet};
use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, ldap, ARG_POLICY_FILE, ARG_PORT};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if arguments are inconsistent or the users/policy files are invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let auth_opts = auth::Options::parse(matches)?;
    let ldap_opts = ldap::Options::parse(matches)?;

    let users = load_users(auth_opts.users.as_deref(), auth_opts.users_file.as_deref())
        .context("Invalid users configuration")?;
    debug!(count = users.len(), "Loaded local users");

    let policies = match matches.get_one::<PathBuf>(ARG_POLICY_FILE) {
        Some(path) => PolicySet::load(path)
            .with_context(|| format!("Invalid policy file {}", path.display()))?,
        None => PolicySet::default(),
    };

    Ok(Action::Server(Args {
        port,
        auth: auth_opts.config,
        users,
        ldap: ldap_opts.config,
        policies,
    }))
}
