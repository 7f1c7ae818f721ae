use crate::{
    api::{self, AppState},
    auth::{AuthConfig, AuthEngine, CredentialStore, Directory, LdapConfig, PolicySet, User},
    cli::telemetry,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub auth: AuthConfig,
    pub users: Vec<User>,
    pub ldap: Option<LdapConfig>,
    pub policies: PolicySet,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the directory cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let directory = match args.ldap {
        Some(config) => {
            let address = config.address().to_string();
            let directory = Directory::connect(config)
                .await
                .with_context(|| format!("Failed to connect to LDAP server {address}"))?;
            info!(address, "Connected to LDAP server");
            Some(Arc::new(directory))
        }
        None => None,
    };

    let credentials = CredentialStore::new(args.users, directory);
    if !credentials.user_auth_configured() {
        warn!("No local users or LDAP server configured, only OAuth sessions can authenticate");
    }

    let engine = AuthEngine::new(args.auth, credentials);
    let state = Arc::new(AppState::new(engine, args.policies));

    let result = api::new(args.port, state).await;

    telemetry::shutdown_tracer();

    result
}
