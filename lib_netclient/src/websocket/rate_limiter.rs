//! Positional message-rate limiter attached to one WebSocket client.
//!
//! Limits are indexed by position in the configured slot list; slot 0 is
//! the general limit charged for every admitted send, and any other slot
//! is charged on top of it. As with the HTTP limiter, all applicable slots
//! are checked before any of them is charged.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Mutex;
use std::time::Instant;

use super::config::RateLimitSlot;

struct SlotData {
    requests_per_period: u32,
    period_ms: u64,
    count: u32,
    window_start: Instant,
}

impl SlotData {
    fn window_elapsed(&self, now: Instant) -> bool {
        now.duration_since(self.window_start).as_millis() as u64 >= self.period_ms
    }

    fn admits(&self, now: Instant) -> bool {
        if self.window_elapsed(now) {
            return true;
        }
        self.count < self.requests_per_period || self.requests_per_period == 0
    }

    fn consume(&mut self, now: Instant) {
        if self.window_elapsed(now) {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
    }
}

/// Per-client send admission control.
#[derive(Default)]
pub struct RateLimiter {
    slots: Mutex<Vec<SlotData>>,
}

impl RateLimiter {
    /// Creates a limiter with no slots (everything admitted).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the slot configuration, resetting every window.
    pub fn set_limits(&self, limits: &[RateLimitSlot]) {
        let now = Instant::now();
        let mut slots = self.slots.lock().expect("ws rate limiter lock poisoned");
        *slots = limits
            .iter()
            .map(|limit| SlotData {
                requests_per_period: limit.requests_per_period,
                period_ms: limit.period_ms,
                count: 0,
                window_start: now,
            })
            .collect();
    }

    /// Checks the general slot plus `rate_limit_id` and charges both only
    /// when both admit. An id beyond the configured slots is admitted
    /// without charge.
    pub fn allow_request(&self, rate_limit_id: usize) -> bool {
        let mut slots = self.slots.lock().expect("ws rate limiter lock poisoned");
        if rate_limit_id >= slots.len() {
            return true;
        }

        let now = Instant::now();
        let general_allowed = slots.first().map_or(true, |slot| slot.admits(now));
        let specific_allowed =
            rate_limit_id == 0 || slots[rate_limit_id].admits(now);

        if !(general_allowed && specific_allowed) {
            return false;
        }

        if let Some(slot) = slots.first_mut() {
            slot.consume(now);
        }
        if rate_limit_id != 0 {
            if let Some(slot) = slots.get_mut(rate_limit_id) {
                slot.consume(now);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_configuration_admits_everything() {
        let limiter = RateLimiter::new();
        for id in 0..5 {
            assert!(limiter.allow_request(id));
        }
    }

    #[test]
    fn general_slot_gates_every_send() {
        let limiter = RateLimiter::new();
        limiter.set_limits(&[RateLimitSlot::new(2, 60_000), RateLimitSlot::new(10, 60_000)]);
        assert!(limiter.allow_request(1));
        assert!(limiter.allow_request(0));
        // The general slot is exhausted; slot 1's remaining capacity does
        // not help.
        assert!(!limiter.allow_request(1));
        assert!(!limiter.allow_request(0));
    }

    #[test]
    fn specific_denial_charges_nothing() {
        let limiter = RateLimiter::new();
        limiter.set_limits(&[RateLimitSlot::new(10, 60_000), RateLimitSlot::new(1, 60_000)]);
        assert!(limiter.allow_request(1));
        assert!(!limiter.allow_request(1));
        // The general slot was charged once, not twice.
        for _ in 0..9 {
            assert!(limiter.allow_request(0));
        }
        assert!(!limiter.allow_request(0));
    }

    #[test]
    fn out_of_range_slot_is_admitted_without_charge() {
        let limiter = RateLimiter::new();
        limiter.set_limits(&[RateLimitSlot::new(1, 60_000)]);
        // Slot 3 does not exist: admitted, and the general slot keeps its
        // capacity.
        for _ in 0..20 {
            assert!(limiter.allow_request(3));
        }
        assert!(limiter.allow_request(0));
        assert!(!limiter.allow_request(0));
    }

    #[test]
    fn windows_reset_after_period() {
        let limiter = RateLimiter::new();
        limiter.set_limits(&[RateLimitSlot::new(1, 30)]);
        assert!(limiter.allow_request(0));
        assert!(!limiter.allow_request(0));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.allow_request(0));
    }

    #[test]
    fn set_limits_resets_counts() {
        let limiter = RateLimiter::new();
        limiter.set_limits(&[RateLimitSlot::new(1, 60_000)]);
        assert!(limiter.allow_request(0));
        assert!(!limiter.allow_request(0));
        limiter.set_limits(&[RateLimitSlot::new(1, 60_000)]);
        assert!(limiter.allow_request(0));
    }
}
