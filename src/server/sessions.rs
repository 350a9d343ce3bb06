//! Login token tracking.
//!
//! Tokens map to the owner they were issued for and an expiry time. Expired
//! tokens are rejected on lookup and removed by a periodic sweep.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mediabatch_common::OwnerId;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TokenEntry {
    owner: OwnerId,
    expires_at: DateTime<Utc>,
}

/// Thread-safe token store with a sliding expiry window.
#[derive(Clone)]
pub struct TokenStore {
    tokens: Arc<DashMap<String, TokenEntry>>,
    ttl: chrono::Duration,
}

impl TokenStore {
    /// Create a store whose tokens live for `ttl` after their last use.
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    /// Issue a fresh token for `owner`.
    pub fn issue(&self, owner: OwnerId) -> String {
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.ttl;

        tracing::info!(owner = %owner, expires_at = %expires_at, "Issued login token");
        self.tokens
            .insert(token.clone(), TokenEntry { owner, expires_at });
        token
    }

    /// Resolve a token to its owner and renew its expiry.
    ///
    /// An expired token is removed and treated as unknown.
    pub fn lookup(&self, token: &str) -> Option<OwnerId> {
        let now = Utc::now();
        if self
            .tokens
            .remove_if(token, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            tracing::debug!("Rejected expired login token");
            return None;
        }

        let mut entry = self.tokens.get_mut(token)?;
        entry.expires_at = now + self.ttl;
        Some(entry.owner.clone())
    }

    /// Forget a token. Returns whether it was known.
    pub fn revoke(&self, token: &str) -> bool {
        match self.tokens.remove(token) {
            Some((_, entry)) => {
                tracing::info!(owner = %entry.owner, "Revoked login token");
                true
            }
            None => false,
        }
    }

    /// Remove every expired token. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        self.tokens.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            tracing::debug!(removed, "Swept expired login tokens");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Start a background task that periodically sweeps expired tokens.
pub fn start_sweep_task(store: TokenStore, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            store.sweep_expired();
        }
    })
}
