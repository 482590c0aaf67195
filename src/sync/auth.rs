use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::Cache;
use crate::clock::Clock;
use crate::config::{self, AUTH_KEY};

#[derive(Debug, Serialize, Deserialize)]
struct AuthRecord {
    token: String,
    expires: DateTime<Utc>,
}

/// Bearer token plus its absolute expiry. Validity is always computed
/// against the clock at read time.
pub struct AuthStore {
    cache: Cache,
    clock: Arc<dyn Clock>,
    token: Option<String>,
    expires: Option<DateTime<Utc>>,
}

impl AuthStore {
    pub fn new(cache: Cache, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            token: None,
            expires: None,
        }
    }

    /// Restore the persisted token. Expired or unreadable records are
    /// dropped, and `true` is returned so the caller can tear down whatever
    /// the previous login left behind.
    pub fn initialize(&mut self) -> bool {
        let present = self.cache.contains(AUTH_KEY);
        let Some(record) = self.cache.load::<AuthRecord>(AUTH_KEY) else {
            return present;
        };

        if record.expires > self.clock.now() {
            self.token = Some(record.token);
            self.expires = Some(record.expires);
            false
        } else {
            info!("Persisted auth token expired at {}", record.expires.to_rfc3339());
            self.clear();
            true
        }
    }

    pub fn set_token(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        let expires = self.clock.now() + config::token_ttl();
        self.token = Some(token.to_string());
        self.expires = Some(expires);
        self.cache.save(
            AUTH_KEY,
            &AuthRecord {
                token: token.to_string(),
                expires,
            },
        );
    }

    /// Drop the token and its persisted record. Session teardown is the
    /// caller's job; see `SyncContext::logout`.
    pub fn clear(&mut self) {
        self.token = None;
        self.expires = None;
        self.cache.remove(AUTH_KEY);
    }

    pub fn is_authenticated(&self) -> bool {
        match (&self.token, self.expires) {
            (Some(_), Some(expires)) => expires > self.clock.now(),
            _ => false,
        }
    }

    /// True while a token is held, expired or not.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// The token doubles as the user id on the wire. `None` once expired.
    pub fn user_id(&self) -> Option<&str> {
        if self.is_authenticated() {
            self.token.as_deref()
        } else {
            None
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires
    }
}
