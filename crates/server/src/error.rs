// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tether servers.

use thiserror::Error;

use crate::offline::QueueError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] tether_core::Error),

    #[error("offline queue error: {0}")]
    Queue(#[from] QueueError),

    /// The connection no longer accepts frames.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("server already started")]
    AlreadyStarted,

    #[error("server stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
