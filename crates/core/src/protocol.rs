// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Packet envelope and control messages shared by client and server.
//!
//! Every frame on the wire carries one JSON envelope:
//! - `uid`: optional correlation id, echoed by the server when replying
//! - `data`: the payload, either an application value or a control message
//!
//! Control messages are recognised by `data.type` and drive registration.
//! The identity a client registers under is carried inside the `REGISTER`
//! payload, never in the envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlates a request with its reply on the client side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        CorrelationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The stable name a client registers under on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(identity: impl Into<String>) -> Self {
        Identity(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Identity(s)
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Correlation id; absent on server pushes and control frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<CorrelationId>,
    /// Payload.
    #[serde(default)]
    pub data: Value,
}

impl Packet {
    /// Creates a correlated packet.
    pub fn request(uid: CorrelationId, data: Value) -> Self {
        Packet {
            uid: Some(uid),
            data,
        }
    }

    /// Creates an un-correlated push.
    pub fn push(data: Value) -> Self {
        Packet { uid: None, data }
    }

    /// Creates a packet carrying a control message.
    pub fn control(uid: Option<CorrelationId>, message: &ControlMessage) -> serde_json::Result<Self> {
        Ok(Packet {
            uid,
            data: serde_json::to_value(message)?,
        })
    }

    /// Returns the control message carried by this packet, if any.
    pub fn control_message(&self) -> Option<ControlMessage> {
        ControlMessage::parse(&self.data)
    }
}

/// Registration control messages, tagged by `data.type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Client asks to be bound to `uid`.
    Register(RegisterRequest),

    /// Server acknowledges a registration.
    Registered,

    /// Server rejects a registration.
    Error {
        /// One of the [`Rejection`] strings.
        message: String,
    },
}

/// Payload of a `REGISTER` control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Identity the client wants to register under.
    pub uid: Identity,
    /// Shared access token, if the client has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

const CONTROL_TYPES: [&str; 3] = ["REGISTER", "REGISTERED", "ERROR"];

impl ControlMessage {
    /// Creates a REGISTER message.
    pub fn register(uid: Identity, token: Option<String>) -> Self {
        ControlMessage::Register(RegisterRequest { uid, token })
    }

    /// Creates an ERROR message for a rejected registration.
    pub fn rejected(rejection: Rejection) -> Self {
        ControlMessage::Error {
            message: rejection.to_string(),
        }
    }

    /// Interprets a payload as a control message.
    ///
    /// Returns `None` for application payloads, including objects whose
    /// `type` is not one of the control types.
    pub fn parse(data: &Value) -> Option<Self> {
        let kind = data.get("type")?.as_str()?;
        if !CONTROL_TYPES.contains(&kind) {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }
}

/// Reasons a server refuses a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another connection holds the identity and no token allows superseding it.
    DuplicateIdentity,
    /// Token missing or different from the configured one.
    TokenMismatch,
    /// The authorizer refused the client.
    Unauthorized,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::DuplicateIdentity => "uid already defined!",
            Rejection::TokenMismatch => "tokens mismatch!",
            Rejection::Unauthorized => "Unauthorized",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
