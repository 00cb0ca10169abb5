// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnection backoff.
//!
//! The interval grows by a constant factor after every lost or failed
//! connection, capped at a maximum. A connection that stays up for the
//! stabilization period resets it to the base, so one transient blip does
//! not slow down recovery from a later, unrelated outage.

use std::time::Duration;

use tether_core::ClientConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: f64,
    max_ms: f64,
    factor: f64,
    current_ms: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let base_ms = base.as_secs_f64() * 1000.0;
        Backoff {
            base_ms,
            max_ms: max.as_secs_f64() * 1000.0,
            factor,
            current_ms: base_ms,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.reconnect_interval(),
            config.reconnect_interval_max(),
            config.reconnect_interval_factor,
        )
    }

    /// Grows the interval and returns the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.current_ms = (self.current_ms * self.factor).min(self.max_ms);
        self.current()
    }

    /// Current interval, truncated to whole milliseconds.
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms as u64)
    }

    /// Falls back to the base interval.
    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
