//! Per-identity fixed window rate limiting.
//!
//! Each identity gets a window that opens on its first request and lasts one
//! minute. The counter resets when a request arrives after the window closed.
//! State is process-local and does not survive a restart.

use crate::error::{GatewayError, Result};
use dashmap::DashMap;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed window counters keyed by identity.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// `limit` requests per minute per identity. `0` disables limiting.
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: WINDOW,
            windows: DashMap::new(),
        }
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one request for `key`.
    pub fn check(&self, key: &str) -> Result<()> {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) as of `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<()> {
        if self.limit == 0 {
            return Ok(());
        }
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= self.limit {
            return Err(GatewayError::RateLimited { limit: self.limit });
        }
        entry.count += 1;
        Ok(())
    }

    /// Drop windows that closed before `now`.
    pub fn sweep(&self, now: Instant) {
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
    }

    /// Number of tracked identities.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
