//! Authentication and authorization core.
//!
//! [`AuthEngine`] is the entry point; the other modules are its parts and are
//! public so they can be used and tested on their own.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod identity;
pub mod ldap;
pub mod matchers;
pub mod policy;
pub mod rate_limit;
pub mod session;
pub mod totp;
pub mod users;

pub use config::{AuthConfig, ConfigError};
pub use credentials::{CredentialStore, IdentityKind, IdentitySearchResult};
pub use engine::{
    AuthEngine, BasicCredentials, Decision, DenyReason, ForwardRequest, LoginOutcome,
    OAuthIdentity, TotpOutcome,
};
pub use identity::{Provider, RequestIdentity};
pub use ldap::{Directory, DirectoryError, LdapConfig};
pub use policy::{PolicySet, ResourcePolicy};
pub use rate_limit::{LockStatus, RateLimiter};
pub use session::{CookieJar, SessionError, SessionManager, SessionRecord};
pub use users::{load_users, User, UsersError};
