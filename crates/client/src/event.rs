// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Notifications a client reports to its owner.

use tether_core::Packet;

use crate::error::ClientError;

/// State of the client's logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not started.
    Idle,
    /// Dialing the server.
    Connecting,
    /// Stream open and REGISTER sent, waiting for the acknowledgement.
    Registering,
    /// Registration acknowledged.
    Connected,
    /// Waiting before the next connection attempt.
    Reconnecting { attempt: u32 },
    /// Stopped for good.
    Stopped,
}

impl ConnectionState {
    /// True while frames can be written to the server.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Registering | ConnectionState::Connected)
    }
}

/// Events sent from the connection task to the owner.
#[derive(Debug)]
pub enum ClientEvent {
    /// A stream to the server was opened (every reconnection included).
    Connected,
    /// The server acknowledged the registration.
    Registered,
    /// The server refused the registration. The stream stays open.
    Rejected(String),
    /// Any decoded frame, control frames and replies included.
    Message(Packet),
    /// An established stream to the server closed.
    ///
    /// Failed connection attempts never opened a stream and are reported as
    /// [`ClientEvent::Warning`] only.
    Closed,
    /// Non-fatal transport or decoding fault.
    Warning(ClientError),
}
