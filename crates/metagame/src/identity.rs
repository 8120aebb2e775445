//! Session-token to account-identity resolution with sliding expiration.
//!
//! The HTTP login flow (out of scope here) registers a session token for an
//! identity; the binary protocol later resolves that token during
//! RegularConnect. Entries expire after a sliding TTL so a crashed client
//! cannot pin an identity forever, and the map prunes itself opportunistically
//! on access rather than with a dedicated timer.

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default sliding time-to-live for a session entry.
const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Minimum interval between opportunistic prune passes.
const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    identity: String,
    expires_at: Instant,
}

/// Thread-safe session -> identity map with sliding expiration.
#[derive(Debug)]
pub struct SessionIdentityMap {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    prune_interval: Duration,
    last_prune: Mutex<Instant>,
}

impl Default for SessionIdentityMap {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL, DEFAULT_PRUNE_INTERVAL)
    }
}

impl SessionIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration, prune_interval: Duration) -> Self {
        let ttl = if ttl.is_zero() { Duration::from_secs(600) } else { ttl };
        let prune_interval = if prune_interval.is_zero() {
            Duration::from_secs(30)
        } else {
            prune_interval
        };
        Self {
            entries: DashMap::new(),
            ttl,
            prune_interval,
            last_prune: Mutex::new(Instant::now()),
        }
    }

    /// Registers (or refreshes) the identity behind a session token.
    /// Blank tokens or identities are ignored.
    pub fn set_identity_for_session(&self, session_token: &str, identity: &str) {
        let session = normalize_token(session_token);
        let identity = normalize_token(identity);
        if session.is_empty() || identity.is_empty() {
            return;
        }
        self.maybe_prune();
        self.entries.insert(
            session,
            Entry {
                identity,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Resolves a session token to its identity, refreshing the sliding TTL
    /// on success. Returns `None` for unknown or expired tokens.
    pub fn try_resolve_identity(&self, session_token: &str) -> Option<String> {
        let session = normalize_token(session_token);
        if session.is_empty() {
            return None;
        }
        self.maybe_prune();
        let now = Instant::now();

        let mut entry = match self.entries.get_mut(&session) {
            Some(entry) => entry,
            None => return None,
        };
        if entry.expires_at <= now {
            drop(entry);
            self.entries.remove(&session);
            return None;
        }
        entry.expires_at = now + self.ttl;
        Some(entry.identity.clone())
    }

    fn maybe_prune(&self) {
        let now = Instant::now();
        {
            let mut last = match self.last_prune.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if now.duration_since(*last) < self.prune_interval {
                return;
            }
            *last = now;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

/// Normalizes the guid-ish tokens the client produces: case folded, trimmed,
/// with brace decoration stripped.
fn normalize_token(token: &str) -> String {
    token
        .trim()
        .trim_matches(|c| c == '{' || c == '}')
        .to_ascii_lowercase()
}
