//! LDAP directory access.
//!
//! Flow Overview:
//! 1) Searches run as the service account and resolve a username to a DN.
//! 2) Verification binds as the user DN with the supplied password.
//! 3) The connection is re-bound as the service account afterwards, whatever the
//!    user bind returned.
//!
//! The connection sits behind a mutex for the whole bind/re-bind sequence. The
//! `service_bound` flag is cleared before a user bind and only set again once the
//! service re-bind succeeds, so a verification future dropped half-way leaves the
//! flag cleared and the next caller re-binds before using the connection.

use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, future::Future, pin::Pin, time::Duration};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const DEFAULT_SEARCH_FILTER: &str = "(uid=%s)";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub type DirectoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DirectoryError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("ldap error: {0}")]
    Ldap(#[from] ldap3::LdapError),
    #[error("directory operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("no directory entry for {0}")]
    NotFound(String),
    #[error("{count} directory entries match {username}")]
    Ambiguous { username: String, count: usize },
    #[error("empty password")]
    EmptyPassword,
    #[error("failed to restore service account bind: {0}")]
    ServiceRebind(String),
}

/// Low-level operations on a single directory connection.
pub trait DirectoryConnection: Send {
    fn bind<'a>(&'a mut self, dn: &'a str, password: &'a str) -> DirectoryFuture<'a, ()>;

    /// Return the DNs of all entries under `base_dn` matching `filter`.
    fn search<'a>(&'a mut self, base_dn: &'a str, filter: &'a str)
        -> DirectoryFuture<'a, Vec<String>>;
}

#[derive(Clone)]
pub struct LdapConfig {
    address: String,
    bind_dn: String,
    bind_password: SecretString,
    base_dn: String,
    search_filter: String,
    insecure: bool,
    timeout: Duration,
}

impl LdapConfig {
    #[must_use]
    pub fn new(
        address: String,
        bind_dn: String,
        bind_password: SecretString,
        base_dn: String,
    ) -> Self {
        Self {
            address,
            bind_dn,
            bind_password,
            base_dn,
            search_filter: DEFAULT_SEARCH_FILTER.to_string(),
            insecure: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_search_filter(mut self, filter: String) -> Self {
        self.search_filter = filter;
        self
    }

    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    #[must_use]
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    #[must_use]
    pub fn search_filter(&self) -> &str {
        &self.search_filter
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the search filter for a username, escaping filter metacharacters.
    #[must_use]
    pub fn filter_for(&self, username: &str) -> String {
        self.search_filter
            .replace("%s", &ldap3::ldap_escape(username))
    }
}

impl fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConfig")
            .field("address", &self.address)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"***")
            .field("base_dn", &self.base_dn)
            .field("search_filter", &self.search_filter)
            .field("insecure", &self.insecure)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// `ldap3` backed connection.
pub struct LdapConnection {
    ldap: ldap3::Ldap,
}

impl LdapConnection {
    /// Open a connection and spawn its driver task.
    ///
    /// # Errors
    /// Returns an error if the server cannot be reached within the timeout.
    pub async fn connect(config: &LdapConfig) -> Result<Self, DirectoryError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(config.timeout)
            .set_no_tls_verify(config.insecure);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.address).await?;

        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                warn!("LDAP connection closed: {err}");
            }
        });

        Ok(Self { ldap })
    }
}

impl DirectoryConnection for LdapConnection {
    fn bind<'a>(&'a mut self, dn: &'a str, password: &'a str) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            self.ldap.simple_bind(dn, password).await?.success()?;
            Ok(())
        })
    }

    fn search<'a>(
        &'a mut self,
        base_dn: &'a str,
        filter: &'a str,
    ) -> DirectoryFuture<'a, Vec<String>> {
        Box::pin(async move {
            let (entries, _) = self
                .ldap
                .search(base_dn, Scope::Subtree, filter, vec!["dn"])
                .await?
                .success()?;
            Ok(entries
                .into_iter()
                .map(|entry| SearchEntry::construct(entry).dn)
                .collect())
        })
    }
}

struct BindState {
    conn: Box<dyn DirectoryConnection>,
    service_bound: bool,
}

/// Directory handle shared by all requests.
pub struct Directory {
    config: LdapConfig,
    state: Mutex<BindState>,
}

impl Directory {
    /// Connect and bind as the service account.
    ///
    /// # Errors
    /// Returns an error if the connection or the initial service bind fails.
    pub async fn connect(config: LdapConfig) -> Result<Self, DirectoryError> {
        let conn = LdapConnection::connect(&config).await?;
        let directory = Self::with_connection(config, Box::new(conn));
        drop(directory.acquire().await?);
        Ok(directory)
    }

    /// Wrap an existing connection; the service bind happens on first use.
    #[must_use]
    pub fn with_connection(config: LdapConfig, conn: Box<dyn DirectoryConnection>) -> Self {
        Self {
            config,
            state: Mutex::new(BindState {
                conn,
                service_bound: false,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Resolve a username to the DN of its directory entry.
    ///
    /// # Errors
    /// Returns an error when the search fails or does not match exactly one entry.
    pub async fn search(&self, username: &str) -> Result<String, DirectoryError> {
        let filter = self.config.filter_for(username);
        let mut state = self.acquire().await?;

        let entries = self
            .timed(state.conn.search(&self.config.base_dn, &filter))
            .await?;

        match entries.as_slice() {
            [dn] => Ok(dn.clone()),
            [] => Err(DirectoryError::NotFound(username.to_string())),
            _ => Err(DirectoryError::Ambiguous {
                username: username.to_string(),
                count: entries.len(),
            }),
        }
    }

    /// Bind as `dn` with `password`, then restore the service account bind.
    ///
    /// # Errors
    /// Returns the user bind error, or [`DirectoryError::ServiceRebind`] when the
    /// connection could not be returned to the service account.
    pub async fn authenticate(&self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        if password.is_empty() {
            // An empty password is an anonymous bind on most servers.
            return Err(DirectoryError::EmptyPassword);
        }

        let mut state = self.acquire().await?;

        state.service_bound = false;
        let user_bind = self.timed(state.conn.bind(dn, password)).await;

        if let Err(err) = self.rebind_service(&mut state).await {
            return Err(DirectoryError::ServiceRebind(err.to_string()));
        }

        user_bind
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, BindState>, DirectoryError> {
        let mut state = self.state.lock().await;
        if !state.service_bound {
            debug!("Connection not bound as service account, re-binding");
            self.rebind_service(&mut state).await?;
        }
        Ok(state)
    }

    async fn rebind_service(&self, state: &mut BindState) -> Result<(), DirectoryError> {
        state.service_bound = false;
        self.timed(state.conn.bind(
            &self.config.bind_dn,
            self.config.bind_password.expose_secret(),
        ))
        .await?;
        state.service_bound = true;
        Ok(())
    }

    async fn timed<T>(&self, operation: DirectoryFuture<'_, T>) -> Result<T, DirectoryError> {
        match tokio::time::timeout(self.config.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(self.config.timeout)),
        }
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{config, FakeConnection, SERVICE_DN};
    use super::*;
    use anyhow::Result;

    const ALICE_DN: &str = "uid=alice,ou=people,dc=example,dc=com";

    #[test]
    fn filter_for_escapes_username() {
        let config = config();
        assert_eq!(config.filter_for("alice"), "(uid=alice)");
        assert_eq!(config.filter_for("a*)(uid=*"), "(uid=a\\2a\\29\\28uid=\\2a)");
    }

    #[test]
    fn debug_redacts_bind_password() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("svc-secret"));
    }

    #[tokio::test]
    async fn search_binds_service_account_first() -> Result<()> {
        let fake = FakeConnection::new().with_user("alice", "wonderland");
        let directory = Directory::with_connection(config(), Box::new(fake.clone()));

        let dn = directory.search("alice").await?;
        assert_eq!(dn, ALICE_DN);
        assert_eq!(fake.binds(), vec![SERVICE_DN.to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn search_unknown_user_is_not_found() {
        let directory = Directory::with_connection(config(), Box::new(FakeConnection::new()));
        let result = directory.search("mallory").await;
        assert!(matches!(result, Err(DirectoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn search_ambiguous_user_is_rejected() {
        let mut fake = FakeConnection::new();
        fake.entries.insert(
            "(uid=dup)".to_string(),
            vec!["uid=dup,ou=a".to_string(), "uid=dup,ou=b".to_string()],
        );
        let directory = Directory::with_connection(config(), Box::new(fake));
        let result = directory.search("dup").await;
        assert!(matches!(
            result,
            Err(DirectoryError::Ambiguous { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn authenticate_rebinds_after_success() -> Result<()> {
        let fake = FakeConnection::new().with_user("alice", "wonderland");
        let directory = Directory::with_connection(config(), Box::new(fake.clone()));

        directory.authenticate(ALICE_DN, "wonderland").await?;
        assert_eq!(
            fake.binds(),
            vec![
                SERVICE_DN.to_string(),
                ALICE_DN.to_string(),
                SERVICE_DN.to_string()
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_rebinds_after_wrong_password() {
        let fake = FakeConnection::new().with_user("alice", "wonderland");
        let directory = Directory::with_connection(config(), Box::new(fake.clone()));

        let result = directory.authenticate(ALICE_DN, "wrong").await;
        assert!(matches!(result, Err(DirectoryError::NotFound(_))));
        assert_eq!(fake.binds().last().map(String::as_str), Some(SERVICE_DN));
    }

    #[tokio::test]
    async fn authenticate_fails_when_rebind_fails() -> Result<()> {
        let fake = FakeConnection::new().with_user("alice", "wonderland");
        let directory = Directory::with_connection(config(), Box::new(fake.clone()));
        directory.search("alice").await?;

        fake.set_fail_service_bind(true);
        let result = directory.authenticate(ALICE_DN, "wonderland").await;
        assert!(matches!(result, Err(DirectoryError::ServiceRebind(_))));

        // The next caller must restore the service bind before searching.
        fake.set_fail_service_bind(false);
        let before = fake.binds().len();
        directory.search("alice").await?;
        assert_eq!(fake.binds().get(before).map(String::as_str), Some(SERVICE_DN));
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_rejects_empty_password_without_binding() {
        let fake = FakeConnection::new().with_user("alice", "wonderland");
        let directory = Directory::with_connection(config(), Box::new(fake.clone()));

        let result = directory.authenticate(ALICE_DN, "").await;
        assert!(matches!(result, Err(DirectoryError::EmptyPassword)));
        assert!(fake.binds().is_empty());
    }

    #[tokio::test]
    async fn authenticate_times_out() {
        let mut fake = FakeConnection::new().with_user("alice", "wonderland");
        fake.hang_on_dn = Some(ALICE_DN.to_string());
        let directory = Directory::with_connection(
            config().with_timeout(Duration::from_millis(50)),
            Box::new(fake.clone()),
        );

        let result = directory.authenticate(ALICE_DN, "wonderland").await;
        assert!(matches!(result, Err(DirectoryError::Timeout(_))));
        assert_eq!(fake.binds().last().map(String::as_str), Some(SERVICE_DN));
    }

    #[tokio::test]
    async fn abandoned_verification_is_rebound_by_next_caller() -> Result<()> {
        let mut fake = FakeConnection::new().with_user("alice", "wonderland");
        fake.hang_on_dn = Some(ALICE_DN.to_string());
        let directory = Directory::with_connection(
            config().with_timeout(Duration::from_secs(30)),
            Box::new(fake.clone()),
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            directory.authenticate(ALICE_DN, "wonderland"),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(fake.binds().last().map(String::as_str), Some(ALICE_DN));

        directory.search("alice").await?;
        assert_eq!(fake.binds().last().map(String::as_str), Some(SERVICE_DN));
        Ok(())
    }
}
