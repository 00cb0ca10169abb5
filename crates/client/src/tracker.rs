// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Request correlation and timeout bookkeeping.
//!
//! The tracker holds packets that are still owed something: a reply (for
//! requests) or a write (for packets sent while disconnected). Entries are
//! kept in send order, so the oldest entry is always at the front and a
//! single deadline, the oldest entry's, covers the whole tracker.
//!
//! The tracker is a plain data structure: callers pass the current time and
//! drive the timer themselves.

use std::collections::VecDeque;
use std::time::Duration;

use tether_core::{CorrelationId, Packet};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ClientError, Result};

/// Completes a request with its reply or its failure.
pub type Responder = oneshot::Sender<Result<Packet>>;

struct PendingRequest {
    uid: CorrelationId,
    responder: Option<Responder>,
    enqueued_at: Instant,
    /// Encoded frame, kept until it has been written.
    frame: Option<Vec<u8>>,
}

impl PendingRequest {
    fn delivered(&self) -> bool {
        self.frame.is_none()
    }
}

pub struct RequestTracker {
    timeout: Duration,
    entries: VecDeque<PendingRequest>,
    armed: Option<Instant>,
}

impl RequestTracker {
    pub fn new(timeout: Duration) -> Self {
        RequestTracker {
            timeout,
            entries: VecDeque::new(),
            armed: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instant at which the next sweep is due, if any entry is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.armed
    }

    /// Number of entries whose frame has not been written yet.
    pub fn unsent(&self) -> usize {
        self.entries.iter().filter(|e| !e.delivered()).count()
    }

    /// Adds an entry. `frame` is the encoded packet when it could not be
    /// written yet, `None` when it already went out.
    ///
    /// Returns true when this arms the timer, i.e. the tracker had no deadline.
    pub fn enqueue(
        &mut self,
        uid: CorrelationId,
        responder: Option<Responder>,
        frame: Option<Vec<u8>>,
        now: Instant,
    ) -> bool {
        self.entries.push_back(PendingRequest {
            uid,
            responder,
            enqueued_at: now,
            frame,
        });
        if self.armed.is_none() {
            self.armed = Some(now + self.timeout);
            return true;
        }
        false
    }

    /// Completes the entry correlated with `packet`, if there is one.
    ///
    /// Returns false for replies nobody waits for, including late replies to
    /// requests that already timed out.
    pub fn resolve(&mut self, uid: &CorrelationId, packet: Packet) -> bool {
        let Some(index) = self.entries.iter().position(|e| &e.uid == uid) else {
            return false;
        };
        let entry = self.entries.remove(index);
        if self.entries.is_empty() {
            self.armed = None;
        }
        if let Some(responder) = entry.and_then(|e| e.responder) {
            let _ = responder.send(Ok(packet));
        }
        true
    }

    /// Evicts every entry older than the timeout and rearms for the next one.
    ///
    /// Requests are failed with [`ClientError::Timeout`]; fire-and-forget
    /// entries are dropped silently. Returns the number of evicted entries.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        self.armed = None;
        while let Some(oldest) = self.entries.front() {
            let deadline = oldest.enqueued_at + self.timeout;
            if now < deadline {
                self.armed = Some(deadline);
                break;
            }
            if let Some(responder) = self.entries.pop_front().and_then(|e| e.responder) {
                let _ = responder.send(Err(ClientError::Timeout));
            }
            evicted += 1;
        }
        evicted
    }

    /// Takes the frames still waiting for a connection, in send order.
    ///
    /// Fire-and-forget entries are done once written and leave the tracker;
    /// requests stay until their reply or timeout.
    pub fn take_unsent(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        self.entries.retain_mut(|entry| {
            if let Some(frame) = entry.frame.take() {
                frames.push(frame);
            }
            entry.responder.is_some()
        });
        if self.entries.is_empty() {
            self.armed = None;
        }
        frames
    }

    /// Drops every entry, failing pending requests with `error()`.
    pub fn fail_all(&mut self, error: impl Fn() -> ClientError) {
        for entry in self.entries.drain(..) {
            if let Some(responder) = entry.responder {
                let _ = responder.send(Err(error()));
            }
        }
        self.armed = None;
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
