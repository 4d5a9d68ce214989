//! # HTTP Rate Limiter
//!
//! Admission control for outgoing HTTP requests. Each limit is a fixed
//! window of `period_ms` milliseconds admitting at most
//! `requests_per_period` requests; a request may be bound to two limits at
//! once (a *general* and a *specific* one) and is admitted only when both
//! agree.
//!
//! The check of both limits and the update of both counters happen inside
//! one critical section. A partial update (one limit consumed while the
//! other denies) can never occur.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct LimitData {
    requests_per_period: u32,
    period_ms: u64,
    count: u32,
    window_start: Instant,
}

impl LimitData {
    fn window_elapsed(&self, now: Instant) -> bool {
        now.duration_since(self.window_start).as_millis() as u64 >= self.period_ms
    }

    /// Admission check without consuming a slot.
    fn admits(&self, now: Instant) -> bool {
        if self.window_elapsed(now) {
            // The window is logically reset; the update will do it for real.
            return true;
        }
        self.count < self.requests_per_period || self.requests_per_period == 0
    }

    /// Consumes one slot, resetting the window first when it elapsed.
    fn consume(&mut self, now: Instant) {
        if self.window_elapsed(now) {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
    }
}

struct LimiterState {
    next_id: u64,
    limits: HashMap<u64, LimitData>,
}

/// Registry of fixed-window rate limits keyed by id.
///
/// Id 0 is never allocated, so a request carrying id 0 for either slot is
/// simply unconstrained on that slot.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LimiterState {
                next_id: 1,
                limits: HashMap::new(),
            }),
        }
    }

    /// Allocates a limit admitting `requests_per_period` requests per
    /// `period_ms` window and returns its id. `requests_per_period == 0`
    /// means unlimited.
    pub fn create_limit(&self, requests_per_period: u32, period_ms: u64) -> u64 {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        let id = state.next_id;
        state.next_id += 1;
        state.limits.insert(
            id,
            LimitData {
                requests_per_period,
                period_ms,
                count: 0,
                window_start: Instant::now(),
            },
        );
        id
    }

    /// Removes a limit. Returns false when the id is unknown.
    pub fn remove_limit(&self, limit_id: u64) -> bool {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        state.limits.remove(&limit_id).is_some()
    }

    /// Checks both limits and, only when both admit, consumes a slot from
    /// each. Unknown ids impose no constraint.
    pub fn allow_request(&self, general_id: u64, specific_id: u64) -> bool {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        if !state.limits.contains_key(&general_id) && !state.limits.contains_key(&specific_id) {
            return true;
        }

        let now = Instant::now();
        let general_allowed = state
            .limits
            .get(&general_id)
            .map_or(true, |limit| limit.admits(now));
        let specific_allowed = state
            .limits
            .get(&specific_id)
            .map_or(true, |limit| limit.admits(now));

        if !(general_allowed && specific_allowed) {
            return false;
        }

        // Both admit: update every present limit, never just one.
        if let Some(limit) = state.limits.get_mut(&general_id) {
            limit.consume(now);
        }
        if specific_id != general_id {
            if let Some(limit) = state.limits.get_mut(&specific_id) {
                limit.consume(now);
            }
        }
        true
    }
}
