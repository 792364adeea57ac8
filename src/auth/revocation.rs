//! Token revocation list
//!
//! Revoked token ids are kept until the token would have expired anyway.

use crate::clock::SharedClock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// In-memory `jti -> exp` deny list
pub struct RevocationList {
    entries: DashMap<String, i64>,
    clock: SharedClock,
}

impl RevocationList {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Revoke a token id until its expiry (unix seconds)
    pub fn revoke(&self, jti: &str, exp: i64) {
        if exp <= self.clock.now().timestamp() {
            // already unusable
            return;
        }
        self.entries.insert(jti.to_string(), exp);
        tracing::debug!(jti = %jti, exp, "Token id revoked");
    }

    /// Revoke only if not yet revoked. Returns false when the id was
    /// already present, so two concurrent rotations of one refresh
    /// token cannot both succeed.
    pub fn revoke_once(&self, jti: &str, exp: i64) -> bool {
        let now = self.clock.now().timestamp();
        match self.entries.entry(jti.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(exp);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(exp);
                true
            }
        }
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        let now = self.clock.now().timestamp();
        let revoked = self.entries.get(jti).map(|exp| *exp > now);

        match revoked {
            Some(true) => true,
            Some(false) => {
                self.entries.remove_if(jti, |_, exp| *exp <= now);
                false
            }
            None => false,
        }
    }

    /// Drop entries whose tokens have expired. Returns the number removed.
    pub fn purge_stale(&self) -> usize {
        let now = self.clock.now().timestamp();
        let before = self.entries.len();
        self.entries.retain(|_, exp| *exp > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expiry recorded for a revoked id, if any
    pub fn expires_at(&self, jti: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(jti)
            .and_then(|exp| DateTime::<Utc>::from_timestamp(*exp, 0))
    }
}
