//! Per-client request throttling
//!
//! A fixed-window counter keyed by client identity. Each client gets
//! `max_requests` requests per window; the window starts on the first
//! request and restarts on the first request after it expires.
//!
//! ```rust
//! use fleet_telemetry::security::RateLimiter;
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(2, Duration::from_secs(60));
//! assert!(limiter.allow("10.0.0.1"));
//! assert!(limiter.allow("10.0.0.1"));
//! assert!(!limiter.allow("10.0.0.1"));
//! ```

use axum::http::HeaderMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Request count for one client inside its current window
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    expires_at: Instant,
}

/// Snapshot of limiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Clients with a window entry
    pub tracked_clients: usize,
    /// Requests denied since startup
    pub rejected: u64,
}

/// Fixed-window rate limiter
///
/// Entries are created on first use and never evicted; an expired entry is
/// reset in place by the next request from the same client.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
    max_requests: u32,
    window: Duration,
    rejected: AtomicU64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
            rejected: AtomicU64::new(0),
        }
    }

    /// Zero requests or a zero window turns limiting off
    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0 && !self.window.is_zero()
    }

    /// Record a request from `key`; `false` means it must be rejected
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// [`Self::allow`] against an explicit clock
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut windows = self.windows.lock();
        match windows.get_mut(key) {
            Some(w) if now <= w.expires_at => {
                if w.count >= self.max_requests {
                    drop(windows);
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                w.count += 1;
            }
            Some(w) => {
                w.count = 1;
                w.expires_at = now + self.window;
            }
            None => {
                windows.insert(
                    key.to_string(),
                    RateWindow {
                        count: 1,
                        expires_at: now + self.window,
                    },
                );
            }
        }
        true
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tracked_clients: self.windows.lock().len(),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Client identity for rate limiting
///
/// The first `X-Forwarded-For` entry wins; otherwise the peer IP. Requests
/// with neither share the `unknown` bucket.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}
