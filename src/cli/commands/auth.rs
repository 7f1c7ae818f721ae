use crate::auth::AuthConfig;
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;

pub const ARG_SECRET: &str = "secret";
pub const ARG_ENCRYPTION_SECRET: &str = "encryption-secret";
pub const ARG_COOKIE_NAME: &str = "cookie-name";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_LOGIN_MAX_RETRIES: &str = "login-max-retries";
pub const ARG_LOGIN_TIMEOUT_SECONDS: &str = "login-timeout-seconds";
pub const ARG_OAUTH_WHITELIST: &str = "oauth-whitelist";
pub const ARG_USERS: &str = "users";
pub const ARG_USERS_FILE: &str = "users-file";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_login_args(command);
    with_user_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SECRET)
                .long(ARG_SECRET)
                .help("Secret used to authenticate session cookies (32+ characters)")
                .env("TOLLGATE_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ENCRYPTION_SECRET)
                .long(ARG_ENCRYPTION_SECRET)
                .help("Secret used to encrypt session cookies (32+ characters)")
                .env("TOLLGATE_ENCRYPTION_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME)
                .long(ARG_COOKIE_NAME)
                .help("Session cookie name")
                .env("TOLLGATE_COOKIE_NAME")
                .default_value("tollgate_session"),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Parent domain of the protected services, e.g. example.com")
                .env("TOLLGATE_COOKIE_DOMAIN")
                .default_value(""),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Only send the session cookie over HTTPS")
                .env("TOLLGATE_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("TOLLGATE_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_login_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_MAX_RETRIES)
                .long(ARG_LOGIN_MAX_RETRIES)
                .help("Failed logins before an account or IP is locked (0 disables)")
                .env("TOLLGATE_LOGIN_MAX_RETRIES")
                .default_value("5")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_TIMEOUT_SECONDS)
                .long(ARG_LOGIN_TIMEOUT_SECONDS)
                .help("Lockout window in seconds (0 disables)")
                .env("TOLLGATE_LOGIN_TIMEOUT_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OAUTH_WHITELIST)
                .long(ARG_OAUTH_WHITELIST)
                .help("Comma separated emails allowed to log in with OAuth")
                .env("TOLLGATE_OAUTH_WHITELIST")
                .default_value(""),
        )
}

fn with_user_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_USERS)
                .long(ARG_USERS)
                .help("Comma separated users: username:bcrypt_hash[:totp_secret]")
                .env("TOLLGATE_USERS")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_USERS_FILE)
                .long(ARG_USERS_FILE)
                .help("File with one user per line")
                .env("TOLLGATE_USERS_FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub config: AuthConfig,
    pub users: Option<String>,
    pub users_file: Option<PathBuf>,
}

impl Options {
    /// # Errors
    /// Returns an error if a required secret is missing or a setting is out of range.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_SECRET)
            .cloned()
            .context("missing required argument: --secret")?;
        let encryption_secret = matches
            .get_one::<String>(ARG_ENCRYPTION_SECRET)
            .cloned()
            .context("missing required argument: --encryption-secret")?;

        let config = AuthConfig::new(
            SecretString::from(secret),
            SecretString::from(encryption_secret),
        )
        .with_cookie_name(string_arg(matches, ARG_COOKIE_NAME))
        .with_cookie_domain(string_arg(matches, ARG_COOKIE_DOMAIN))
        .with_cookie_secure(matches.get_flag(ARG_COOKIE_SECURE))
        .with_session_ttl_seconds(int_arg(matches, ARG_SESSION_TTL_SECONDS, 86_400))
        .with_login_max_retries(int_arg(matches, ARG_LOGIN_MAX_RETRIES, 5))
        .with_login_timeout_seconds(int_arg(matches, ARG_LOGIN_TIMEOUT_SECONDS, 300))
        .with_oauth_whitelist(string_arg(matches, ARG_OAUTH_WHITELIST));

        config.validate()?;

        Ok(Self {
            config,
            users: matches.get_one::<String>(ARG_USERS).cloned(),
            users_file: matches.get_one::<PathBuf>(ARG_USERS_FILE).cloned(),
        })
    }
}

fn string_arg(matches: &ArgMatches, name: &str) -> String {
    matches.get_one::<String>(name).cloned().unwrap_or_default()
}

fn int_arg(matches: &ArgMatches, name: &str, default: i64) -> i64 {
    matches.get_one::<i64>(name).copied().unwrap_or(default)
}
