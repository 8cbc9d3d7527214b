//! Fixed-window rate limiting per provider
//!
//! Each provider gets a counter that resets when its window expires. The
//! budget is consumed by successful dispatches, not by admission checks: a
//! request that is admitted but fails does not count against the window.
//!
//! To stay correct under concurrent `generate` calls, admission hands out a
//! [`RatePermit`] that reserves a slot until it is committed or dropped, so two
//! callers racing on the last slot cannot both be admitted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Requests allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    in_flight: u32,
    reset_time: Instant,
}

/// Shared per-provider fixed-window counters
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, RateLimit>,
    state: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's limit. Providers never registered are never limited.
    pub fn with_limit(mut self, provider: impl Into<String>, limit: RateLimit) -> Self {
        self.limits.insert(provider.into(), limit);
        self
    }

    pub fn limit_for(&self, provider: &str) -> Option<RateLimit> {
        self.limits.get(provider).copied()
    }

    /// Would a request to `provider` be admitted now?
    pub fn allow(&self, provider: &str) -> bool {
        self.allow_at(provider, Instant::now())
    }

    /// Record one successful dispatch to `provider`
    pub fn record(&self, provider: &str) {
        self.record_at(provider, Instant::now());
    }

    /// Admit and reserve a slot, or `None` if the window is exhausted
    pub fn try_acquire(&self, provider: &str) -> Option<RatePermit<'_>> {
        self.try_acquire_at(provider, Instant::now())
    }

    pub fn allow_at(&self, provider: &str, now: Instant) -> bool {
        let Some(limit) = self.limit_for(provider) else {
            return true;
        };
        let mut state = self.lock();
        let window = current_window(&mut state, provider, limit, now);
        window.count + window.in_flight < limit.max_requests
    }

    pub fn record_at(&self, provider: &str, now: Instant) {
        let Some(limit) = self.limit_for(provider) else {
            return;
        };
        let mut state = self.lock();
        current_window(&mut state, provider, limit, now).count += 1;
    }

    pub fn try_acquire_at(&self, provider: &str, now: Instant) -> Option<RatePermit<'_>> {
        let Some(limit) = self.limit_for(provider) else {
            return Some(RatePermit::unlimited(self, provider));
        };
        let mut state = self.lock();
        let window = current_window(&mut state, provider, limit, now);
        if window.count + window.in_flight >= limit.max_requests {
            return None;
        }
        window.in_flight += 1;
        Some(RatePermit {
            limiter: self,
            provider: provider.to_string(),
            reserved: true,
            window_reset: Some(window.reset_time),
        })
    }

    /// Requests recorded in the current window, for status reporting
    pub fn used(&self, provider: &str) -> u32 {
        self.lock().get(provider).map(|w| w.count).unwrap_or(0)
    }

    fn release(&self, provider: &str, window_reset: Option<Instant>, commit: bool) {
        let mut state = self.lock();
        if let Some(window) = state.get_mut(provider) {
            // A reservation taken in an earlier window was already discarded
            // by the reset; only adjust the window it belongs to.
            if Some(window.reset_time) == window_reset {
                window.in_flight = window.in_flight.saturating_sub(1);
                if commit {
                    window.count += 1;
                }
            } else if commit {
                window.count += 1;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WindowState>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lazily create the provider's window, resetting it once `now` passes `reset_time`
fn current_window<'a>(
    state: &'a mut HashMap<String, WindowState>,
    provider: &str,
    limit: RateLimit,
    now: Instant,
) -> &'a mut WindowState {
    let fresh = WindowState {
        count: 0,
        in_flight: 0,
        reset_time: now + limit.window(),
    };
    let window = state.entry(provider.to_string()).or_insert(fresh);
    if now > window.reset_time {
        *window = fresh;
    }
    window
}

/// A reserved slot in a provider's window.
///
/// [`commit`](Self::commit) records the dispatch; dropping the permit without
/// committing hands the slot back.
#[derive(Debug)]
pub struct RatePermit<'a> {
    limiter: &'a RateLimiter,
    provider: String,
    reserved: bool,
    window_reset: Option<Instant>,
}

impl<'a> RatePermit<'a> {
    fn unlimited(limiter: &'a RateLimiter, provider: &str) -> Self {
        Self {
            limiter,
            provider: provider.to_string(),
            reserved: false,
            window_reset: None,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Count the reserved request against the window
    pub fn commit(mut self) {
        if self.reserved {
            self.reserved = false;
            self.limiter.release(&self.provider, self.window_reset, true);
        }
    }
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        if self.reserved {
            self.limiter.release(&self.provider, self.window_reset, false);
        }
    }
}
