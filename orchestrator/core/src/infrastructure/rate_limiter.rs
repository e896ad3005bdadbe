// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Request rate limiting (§6), scoped to `(client_ip, hashed_auth_prefix,
//! path, minute_window)`.
//!
//! The primary counter lives on the ephemeral store (a plain `INCR` +
//! one-shot `EXPIRE`, the same pattern the pipeline uses for its hourly
//! permission cap). If the ephemeral store is unreachable, callers fall
//! back to an in-process [`governor`] limiter fixed at a conservative rate
//! — never fail-open, per §7 kind 3.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovernorLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use sha2::{Digest, Sha256};

use crate::infrastructure::ephemeral_store::EphemeralStore;

/// Conservative fallback rate applied whenever the ephemeral store can't be
/// reached, regardless of the path's configured limit.
pub const FALLBACK_RPM: u32 = 30;

type Fallback = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    store: EphemeralStore,
    /// One shared fallback limiter per distinct key, created lazily. Sized
    /// to the conservative fallback rate regardless of the caller's
    /// configured limit, since the store being down means we can no longer
    /// tell who's who across processes.
    fallbacks: DashMap<String, Arc<Fallback>>,
}

fn hash_prefix(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

impl RateLimiter {
    pub fn new(store: EphemeralStore) -> Self {
        Self { store, fallbacks: DashMap::new() }
    }

    /// `auth_header` is the raw `Authorization` header value, if any;
    /// hashed (never stored or logged in the clear) before use as a key
    /// component so the limiter can distinguish callers without handling
    /// credentials itself.
    pub fn scope_key(client_ip: &str, auth_header: Option<&str>, path: &str) -> String {
        let auth_prefix = auth_header.map(hash_prefix).unwrap_or_else(|| "anon".to_string());
        let minute_window = chrono::Utc::now().timestamp() / 60;
        format!("ratelimit:{}:{}:{}:{}", client_ip, auth_prefix, path, minute_window)
    }

    pub async fn check(&self, key: &str, limit_rpm: u32) -> RateLimitDecision {
        match self.store.incr(key).await {
            Ok(count) => {
                if count == 1 {
                    let _ = self.store.expire(key, 60).await;
                }
                if count as u32 <= limit_rpm {
                    RateLimitDecision { allowed: true, retry_after_secs: 0 }
                } else {
                    RateLimitDecision { allowed: false, retry_after_secs: 60 }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "ephemeral store unreachable, falling back to in-memory rate limit");
                let quota = Quota::per_minute(NonZeroU32::new(FALLBACK_RPM).expect("fallback rpm is nonzero"));
                let limiter = self
                    .fallbacks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(GovernorLimiter::direct(quota)))
                    .clone();
                match limiter.check() {
                    Ok(()) => RateLimitDecision { allowed: true, retry_after_secs: 0 },
                    Err(_) => RateLimitDecision { allowed: false, retry_after_secs: 60 },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_key_differs_by_hashed_auth_prefix() {
        let k1 = RateLimiter::scope_key("1.2.3.4", Some("Bearer aaa"), "/proxy/execute");
        let k2 = RateLimiter::scope_key("1.2.3.4", Some("Bearer bbb"), "/proxy/execute");
        assert_ne!(k1, k2);
    }

    #[test]
    fn scope_key_anonymous_is_stable_label() {
        let key = RateLimiter::scope_key("1.2.3.4", None, "/proxy/execute");
        assert!(key.contains(":anon:"));
    }
}
