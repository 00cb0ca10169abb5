// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Unique id generation for correlation ids and default identities.
//!
//! Format: `c_{wall_ms}_{pid}_{counter}`
//!
//! The counter resets to 0 whenever the wall clock moves forward and is
//! incremented for every id generated within the same millisecond. If the
//! wall clock goes backwards the last seen millisecond is kept, so ids never
//! repeat within one process.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const UID_PREFIX: &str = "c";

/// Source of process-unique string ids.
///
/// Injected into clients so tests can control the ids they see.
pub trait IdSource: Send + Sync {
    /// Returns a new id, distinct from every id previously returned.
    fn next_id(&self) -> String;
}

/// Trait for getting the current wall clock time.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using `std::time::SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Timestamp-plus-counter id generator.
pub struct UidGenerator<C: ClockSource = SystemClock> {
    clock: C,
    pid: u32,
    last: Mutex<(u64, u64)>,
}

impl UidGenerator<SystemClock> {
    /// Creates a generator using the system clock and current process id.
    pub fn new() -> Self {
        Self::with_clock(SystemClock, std::process::id())
    }
}

impl Default for UidGenerator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> UidGenerator<C> {
    /// Creates a generator with a custom clock source and pid.
    pub fn with_clock(clock: C, pid: u32) -> Self {
        UidGenerator {
            clock,
            pid,
            last: Mutex::new((0, 0)),
        }
    }
}

impl<C: ClockSource> IdSource for UidGenerator<C> {
    fn next_id(&self) -> String {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        let (wall_ms, counter) = if physical > last.0 {
            (physical, 0)
        } else {
            (last.0, last.1 + 1)
        };
        *last = (wall_ms, counter);

        format!("{}_{}_{}_{}", UID_PREFIX, wall_ms, self.pid, counter)
    }
}

#[cfg(test)]
#[path = "uid_tests.rs"]
mod tests;
