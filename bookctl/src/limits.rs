//! Fixed-window request rate limiting.
//!
//! Every client key gets `max_requests` requests per `window`. The window opens at the key's
//! first request and a fresh one opens on the first request after it closes. Counters live in a
//! [`RateLimitStore`]; the policy lives in [`RateLimiter`]. The middleware runs ahead of CSRF and
//! authentication, so rejected requests cost one counter update and nothing else.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::AppState;
use crate::config::{MAX_RATE_LIMIT_WINDOW, RateLimitConfig};
use crate::errors::{Error, Result};
use crate::types::Clock;

/// Sweep closed windows out of the in-memory store after this many increments.
const SWEEP_EVERY: u64 = 1024;

/// Counter state for one key after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

/// Storage for per-key window counters.
#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key` at `now`, opening a new window if the current one has closed.
    async fn increment(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<WindowCount>;
}

/// Process-local counters. Each instance limits independently.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, WindowCount>,
    increments: AtomicU64,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(&self, now: DateTime<Utc>, window: Duration) {
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.window_start + window);
        debug!(removed = before.saturating_sub(self.windows.len()), "Swept closed rate-limit windows");
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn increment(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<WindowCount> {
        let current = {
            let mut entry = self.windows.entry(key.to_string()).or_insert(WindowCount {
                count: 0,
                window_start: now,
            });
            if now >= entry.window_start + window {
                *entry = WindowCount {
                    count: 0,
                    window_start: now,
                };
            }
            entry.count = entry.count.saturating_add(1);
            *entry
        };

        if self.increments.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now, window);
        }

        Ok(current)
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Fixed-window policy over a [`RateLimitStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_requests: config.max_requests,
            window: Duration::from_std(config.window.min(MAX_RATE_LIMIT_WINDOW)).unwrap_or(Duration::seconds(60)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn check(&self, key: &str) -> Result<RateLimitDecision> {
        let counted = self.store.increment(key, self.clock.now(), self.window).await?;

        Ok(RateLimitDecision {
            allowed: counted.count <= self.max_requests,
            remaining: self.max_requests.saturating_sub(counted.count),
            reset_at: counted.window_start + self.window,
        })
    }
}

/// Client key for rate limiting, derived from the client IP.
///
/// With `trust_forwarded` set: `x-forwarded-for` (first hop), then `x-real-ip`, then the socket
/// address. Otherwise only the socket address is used, since clients control those headers.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let peer_key = || peer.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string());
    if !trust_forwarded {
        return peer_key();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded.or(real_ip).map(str::to_string).unwrap_or_else(peer_key)
}

/// Axum middleware enforcing the fixed-window limit on the configured path prefix.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> std::result::Result<Response, Error> {
    let config = &state.config.rate_limit;
    if !config.enabled || !request.uri().path().starts_with(&config.path_prefix) {
        return Ok(next.run(request).await);
    }

    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0);
    let key = client_key(request.headers(), peer, config.trust_forwarded_headers);

    match state.rate_limiter.check(&key).await {
        Ok(decision) if !decision.allowed => {
            metrics::counter!("bookctl_rate_limited_total").increment(1);
            debug!(client = %key, "Rate limit exceeded");
            Err(Error::RateLimited {
                retry_after_secs: decision.retry_after_secs(state.rate_limiter.now()),
            })
        }
        Ok(_) => Ok(next.run(request).await),
        Err(e) => {
            warn!(error = %e, "Rate limit check failed, letting request through");
            Ok(next.run(request).await)
        }
    }
}
