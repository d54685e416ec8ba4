//! Minimum-interval rate limiter for market data providers.
//!
//! Each provider gets its own gate: two granted acquisitions for the
//! same provider are always separated by at least that provider's
//! configured minimum interval, regardless of how many callers contend
//! for it. Different providers never limit each other.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::models::ProviderId;

/// Default spacing for providers with no configured interval.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Reservation slot for a single provider.
#[derive(Debug)]
struct Slot {
    /// Earliest instant the next request may be granted.
    next_free: Instant,
    /// Minimum spacing between grants.
    min_interval: Duration,
}

/// Per-provider minimum-interval gate.
///
/// `acquire` atomically reserves the next grant slot under a single
/// lock (`grant = max(now, next_free)`, then `next_free = grant +
/// min_interval`) and sleeps until the reserved instant. Because the
/// read and the write of the slot happen under one mutex, two
/// concurrent callers can never both observe the same `next_free`;
/// contenders are serialized in reservation order.
pub struct RateLimiter {
    /// Per-provider reservation slots, created on first acquire.
    slots: Mutex<HashMap<String, Slot>>,
    /// Per-provider configured intervals.
    intervals: Mutex<HashMap<String, Duration>>,
}

impl RateLimiter {
    /// Create a new rate limiter with no configured providers.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            intervals: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the slots mutex, recovering from poison if necessary.
    ///
    /// For rate limiting it's safe to recover from a poisoned mutex:
    /// the worst case is slightly incorrect request spacing, which is
    /// better than panicking.
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter slots mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock the intervals mutex, recovering from poison if necessary.
    fn lock_intervals(&self) -> MutexGuard<'_, HashMap<String, Duration>> {
        self.intervals.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter intervals mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure the minimum interval for a specific provider.
    ///
    /// Resets any existing reservation slot so the new interval takes
    /// effect immediately.
    pub fn configure(&self, provider: &ProviderId, min_interval: Duration) {
        let mut intervals = self.lock_intervals();
        intervals.insert(provider.to_string(), min_interval);
        drop(intervals); // Release before acquiring the slots lock

        let mut slots = self.lock_slots();
        slots.remove(provider.as_ref());
    }

    /// Acquire permission to call the given provider.
    ///
    /// Suspends until at least `min_interval` has elapsed since the
    /// previous grant for that provider, then returns. Never fails: a
    /// bounded wait is the only side effect. Cancelling the wait leaves
    /// the reservation in place, so a dropped caller's slot simply goes
    /// unused.
    pub async fn acquire(&self, provider: &ProviderId) {
        let grant = {
            let mut slots = self.lock_slots();
            let now = Instant::now();

            let slot = slots
                .entry(provider.to_string())
                .or_insert_with(|| Slot {
                    // First caller goes through immediately
                    next_free: now,
                    min_interval: self.interval_for(provider),
                });

            let grant = if slot.next_free > now {
                slot.next_free
            } else {
                now
            };
            slot.next_free = grant + slot.min_interval;
            grant
        };

        let wait = grant.saturating_duration_since(Instant::now());
        if wait > Duration::ZERO {
            debug!(
                "Rate limiter: waiting {:?} for provider '{}'",
                wait, provider
            );
            tokio::time::sleep_until(grant).await;
        }
    }

    /// Reset the reservation slot for a provider.
    pub fn reset(&self, provider: &ProviderId) {
        let mut slots = self.lock_slots();
        slots.remove(provider.as_ref());
    }

    /// Look up the configured interval for a provider.
    fn interval_for(&self, provider: &ProviderId) -> Duration {
        let intervals = self.lock_intervals();
        intervals
            .get(provider.as_ref())
            .copied()
            .unwrap_or(DEFAULT_MIN_INTERVAL)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
