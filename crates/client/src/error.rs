// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tether clients.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// No reply arrived within the configured timeout.
    #[error("Timeout reached")]
    Timeout,

    /// The client was stopped before the operation completed.
    #[error("client stopped")]
    Stopped,

    #[error("client already started")]
    AlreadyStarted,

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] tether_core::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
