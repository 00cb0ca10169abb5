// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Store-and-forward queue for identities that are not connected.
//!
//! Packets live in memory and are periodically written to a single JSON
//! snapshot file, fully replacing the previous one:
//!
//! ```json
//! [{"uid": "worker-1", "data": {"k": 1}, "date": 1700000000000}]
//! ```
//!
//! The snapshot is written to a temporary sibling and renamed into place, so
//! readers always see a complete file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::Identity;

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// A packet waiting for its identity to register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPacket {
    /// Destination identity.
    pub uid: Identity,
    pub data: Value,
    /// Time the packet was queued.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
}

/// In-memory queue backed by a snapshot file.
#[derive(Debug)]
pub struct OfflineQueue {
    path: PathBuf,
    retention: Duration,
    entries: Vec<PersistedPacket>,
}

impl OfflineQueue {
    /// Creates an empty queue persisted at `path`. Nothing is read yet.
    pub fn new(path: PathBuf, retention: Duration) -> Self {
        OfflineQueue {
            path,
            retention,
            entries: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PersistedPacket] {
        &self.entries
    }

    /// Replaces the in-memory queue with the snapshot on disk.
    ///
    /// A missing snapshot yields an empty queue and an empty snapshot file is
    /// created. On error the queue is left empty.
    pub fn load(&mut self) -> QueueResult<usize> {
        self.entries.clear();
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.snapshot()?.write()?;
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        self.entries = serde_json::from_slice(&content)?;
        Ok(self.entries.len())
    }

    pub fn push(&mut self, uid: Identity, data: Value, now: DateTime<Utc>) {
        self.entries.push(PersistedPacket {
            uid,
            data,
            date: now,
        });
    }

    /// Removes and returns every payload queued for `uid`, oldest first.
    pub fn take_for(&mut self, uid: &Identity) -> Vec<Value> {
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if &entry.uid == uid {
                taken.push(entry.data);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        taken
    }

    /// Drops packets whose age exceeds the retention window.
    ///
    /// Returns the number of dropped packets.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = TimeDelta::from_std(self.retention) else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|entry| {
            entry
                .date
                .checked_add_signed(retention)
                .is_none_or(|expiry| expiry >= now)
        });
        before - self.entries.len()
    }

    /// Serializes the current queue for writing outside of any lock.
    pub fn snapshot(&self) -> QueueResult<Snapshot> {
        Ok(Snapshot {
            path: self.path.clone(),
            bytes: serde_json::to_vec(&self.entries)?,
        })
    }
}

/// Serialized queue contents bound for the snapshot file.
#[derive(Debug)]
pub struct Snapshot {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl Snapshot {
    /// Atomically replaces the snapshot file, creating its directory.
    pub fn write(self) -> QueueResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &self.bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "offline_tests.rs"]
mod tests;
