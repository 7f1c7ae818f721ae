//! Failed-login tracking and account lockout.
//!
//! Flow Overview:
//! 1) Every login attempt is recorded per identifier (username and/or client IP).
//! 2) `max_retries` consecutive failures lock the identifier for `lockout_seconds`.
//! 3) A successful attempt resets the counter and lifts the lock.
//!
//! The attempt table is private to [`RateLimiter`]; reads share the lock and each
//! read-modify-write holds it exclusively, so concurrent failures cannot both miss
//! the threshold. Limiting is disabled when either setting is not positive.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockStatus {
    Open,
    Locked { remaining_seconds: u64 },
}

impl LockStatus {
    #[must_use]
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    #[must_use]
    pub fn remaining_seconds(self) -> u64 {
        match self {
            Self::Open => 0,
            Self::Locked { remaining_seconds } => remaining_seconds,
        }
    }

    /// Keep the longest of two lockouts.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.remaining_seconds() > self.remaining_seconds() {
            other
        } else {
            self
        }
    }
}

#[derive(Clone, Debug)]
struct LoginAttemptRecord {
    failed_count: u32,
    last_attempt_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_retries: i64,
    lockout_seconds: i64,
    attempts: RwLock<HashMap<String, LoginAttemptRecord>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_retries: i64, lockout_seconds: i64) -> Self {
        Self {
            max_retries,
            lockout_seconds,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.max_retries > 0 && self.lockout_seconds > 0
    }

    pub async fn is_locked(&self, identifier: &str) -> LockStatus {
        self.is_locked_at(identifier, Utc::now()).await
    }

    pub async fn is_locked_at(&self, identifier: &str, now: DateTime<Utc>) -> LockStatus {
        if !self.enabled() {
            return LockStatus::Open;
        }

        let attempts = self.attempts.read().await;
        match attempts.get(identifier).and_then(|record| record.locked_until) {
            Some(until) if until > now => LockStatus::Locked {
                remaining_seconds: ceil_seconds(until - now),
            },
            _ => LockStatus::Open,
        }
    }

    pub async fn record_attempt(&self, identifier: &str, success: bool) {
        self.record_attempt_at(identifier, success, Utc::now()).await;
    }

    pub async fn record_attempt_at(&self, identifier: &str, success: bool, now: DateTime<Utc>) {
        if !self.enabled() {
            return;
        }

        let mut attempts = self.attempts.write().await;
        let record = attempts
            .entry(identifier.to_string())
            .or_insert_with(|| LoginAttemptRecord {
                failed_count: 0,
                last_attempt_at: now,
                locked_until: None,
            });

        record.last_attempt_at = now;

        if success {
            record.failed_count = 0;
            record.locked_until = None;
            return;
        }

        record.failed_count = record.failed_count.saturating_add(1);

        if i64::from(record.failed_count) >= self.max_retries {
            let until = Duration::try_seconds(self.lockout_seconds)
                .and_then(|window| now.checked_add_signed(window))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.locked_until = Some(until);
            warn!(
                identifier,
                timeout = self.lockout_seconds,
                "Account locked due to too many failed login attempts"
            );
        }
    }

    /// Current failure count for an identifier, zero when unknown.
    pub async fn failed_count(&self, identifier: &str) -> u32 {
        self.attempts
            .read()
            .await
            .get(identifier)
            .map_or(0, |record| record.failed_count)
    }

    pub async fn last_attempt_at(&self, identifier: &str) -> Option<DateTime<Utc>> {
        self.attempts
            .read()
            .await
            .get(identifier)
            .map(|record| record.last_attempt_at)
    }
}

fn ceil_seconds(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0)
}
