//! Username/password verification against local users and the directory.
//!
//! Flow Overview:
//! 1) `search` resolves a username: the local list first, then the directory.
//! 2) `verify` checks the password with the backend the search picked.
//!
//! Callers only ever see a boolean; which backend was tried stays in the logs.

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    ldap::{Directory, DirectoryError},
    users::User,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityKind {
    Local,
    Directory,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentitySearchResult {
    /// Username for local users, distinguished name for directory entries.
    pub identifier: String,
    pub kind: IdentityKind,
}

impl IdentitySearchResult {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            identifier: String::new(),
            kind: IdentityKind::Unknown,
        }
    }
}

#[derive(Debug)]
pub struct CredentialStore {
    users: Vec<User>,
    directory: Option<Arc<Directory>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(users: Vec<User>, directory: Option<Arc<Directory>>) -> Self {
        Self { users, directory }
    }

    #[must_use]
    pub fn user_auth_configured(&self) -> bool {
        !self.users.is_empty() || self.directory.is_some()
    }

    #[must_use]
    pub fn local_user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|user| user.username == username)
    }

    pub async fn search(&self, username: &str) -> IdentitySearchResult {
        if self.local_user(username).is_some() {
            return IdentitySearchResult {
                identifier: username.to_string(),
                kind: IdentityKind::Local,
            };
        }

        let Some(directory) = &self.directory else {
            return IdentitySearchResult::unknown();
        };

        match directory.search(username).await {
            Ok(dn) => {
                debug!(username, dn = %dn, "Resolved user in directory");
                IdentitySearchResult {
                    identifier: dn,
                    kind: IdentityKind::Directory,
                }
            }
            Err(DirectoryError::NotFound(_)) => {
                debug!(username, "User not found in directory");
                IdentitySearchResult::unknown()
            }
            Err(err) => {
                warn!(username, "Failed to search directory: {err}");
                IdentitySearchResult::unknown()
            }
        }
    }

    pub async fn verify(&self, result: &IdentitySearchResult, password: &str) -> bool {
        match result.kind {
            IdentityKind::Local => self.verify_local(&result.identifier, password).await,
            IdentityKind::Directory => self.verify_directory(&result.identifier, password).await,
            IdentityKind::Unknown => {
                warn!("Unknown identity kind, rejecting credentials");
                false
            }
        }
    }

    async fn verify_local(&self, username: &str, password: &str) -> bool {
        let Some(user) = self.local_user(username) else {
            return false;
        };

        let hash = user.password_hash.clone();
        let password = password.to_string();
        match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
            Ok(Ok(matches)) => matches,
            Ok(Err(err)) => {
                warn!(username, "Failed to verify password hash: {err}");
                false
            }
            Err(err) => {
                error!(username, "Password verification task failed: {err}");
                false
            }
        }
    }

    async fn verify_directory(&self, dn: &str, password: &str) -> bool {
        let Some(directory) = &self.directory else {
            warn!(dn, "Directory identity without a configured directory");
            return false;
        };

        match directory.authenticate(dn, password).await {
            Ok(()) => true,
            Err(DirectoryError::ServiceRebind(err)) => {
                error!(dn, "Failed to re-bind directory service account: {err}");
                false
            }
            Err(err) => {
                warn!(dn, "Directory bind failed: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ldap::test_support::{config, FakeConnection};
    use anyhow::Result;

    const ALICE_DN: &str = "uid=alice,ou=people,dc=example,dc=com";

    fn local_store() -> Result<CredentialStore> {
        let user = User {
            username: "bob".to_string(),
            password_hash: bcrypt::hash("hunter2", 4)?,
            totp_secret: None,
        };
        Ok(CredentialStore::new(vec![user], None))
    }

    fn directory_store(conn: FakeConnection) -> CredentialStore {
        let directory = Directory::with_connection(config(), Box::new(conn));
        CredentialStore::new(Vec::new(), Some(Arc::new(directory)))
    }

    #[tokio::test]
    async fn local_user_verifies() -> Result<()> {
        let store = local_store()?;
        let result = store.search("bob").await;
        assert_eq!(result.kind, IdentityKind::Local);
        assert_eq!(result.identifier, "bob");
        assert!(store.verify(&result, "hunter2").await);
        assert!(!store.verify(&result, "wrong").await);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() -> Result<()> {
        let store = local_store()?;
        let result = store.search("mallory").await;
        assert_eq!(result, IdentitySearchResult::unknown());
        assert!(!store.verify(&result, "hunter2").await);
        Ok(())
    }

    #[tokio::test]
    async fn local_result_for_missing_user_is_rejected() -> Result<()> {
        let store = local_store()?;
        let forged = IdentitySearchResult {
            identifier: "mallory".to_string(),
            kind: IdentityKind::Local,
        };
        assert!(!store.verify(&forged, "hunter2").await);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_is_rejected() {
        let user = User {
            username: "bob".to_string(),
            password_hash: "not-a-hash".to_string(),
            totp_secret: None,
        };
        let store = CredentialStore::new(vec![user], None);
        let result = store.search("bob").await;
        assert!(!store.verify(&result, "anything").await);
    }

    #[tokio::test]
    async fn local_users_shadow_directory() -> Result<()> {
        let conn = FakeConnection::new().with_user("bob", "directory-pass");
        let directory = Directory::with_connection(config(), Box::new(conn));
        let mut store = local_store()?;
        store.directory = Some(Arc::new(directory));

        let result = store.search("bob").await;
        assert_eq!(result.kind, IdentityKind::Local);
        assert!(!store.verify(&result, "directory-pass").await);
        Ok(())
    }

    #[tokio::test]
    async fn directory_user_verifies() {
        let conn = FakeConnection::new().with_user("alice", "wonderland");
        let store = directory_store(conn);

        let result = store.search("alice").await;
        assert_eq!(result.kind, IdentityKind::Directory);
        assert_eq!(result.identifier, ALICE_DN);
        assert!(store.verify(&result, "wonderland").await);
        assert!(!store.verify(&result, "wrong").await);
    }

    #[tokio::test]
    async fn directory_miss_is_unknown() {
        let store = directory_store(FakeConnection::new());
        assert_eq!(store.search("alice").await.kind, IdentityKind::Unknown);
    }

    #[tokio::test]
    async fn failed_rebind_rejects_valid_password() {
        let conn = FakeConnection::new().with_user("alice", "wonderland");
        let handle = conn.clone();
        let store = directory_store(conn);

        let result = store.search("alice").await;
        handle.set_fail_service_bind(true);
        assert!(!store.verify(&result, "wonderland").await);
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() -> Result<()> {
        let store = local_store()?;
        let result = IdentitySearchResult {
            identifier: "bob".to_string(),
            kind: IdentityKind::Unknown,
        };
        assert!(!store.verify(&result, "hunter2").await);
        Ok(())
    }

    #[test]
    fn user_auth_configured() -> Result<()> {
        assert!(!CredentialStore::new(Vec::new(), None).user_auth_configured());
        assert!(local_store()?.user_auth_configured());
        assert!(directory_store(FakeConnection::new()).user_auth_configured());
        Ok(())
    }
}
