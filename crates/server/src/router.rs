// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection handles and inbound packets.
//!
//! A [`Connection`] is a cheap, cloneable handle on one accepted socket. It
//! is handed to the application with every event concerning that socket and
//! lets it write to, close, or fault the connection. Every decoded frame is
//! delivered as an [`Inbound`], which can answer its sender directly.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tether_core::{codec, ControlMessage, CorrelationId, Identity, Packet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};

/// Server-unique id of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ConnectionInner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    identity: Mutex<Option<Identity>>,
    writer: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    closing: CancellationToken,
    faulted: CancellationToken,
}

/// Handle on one accepted connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        writer: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Connection {
            inner: Arc::new(ConnectionInner {
                id,
                peer_addr,
                identity: Mutex::new(None),
                writer: Mutex::new(Some(writer)),
                closing: CancellationToken::new(),
                faulted: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Identity bound by a successful registration.
    pub fn identity(&self) -> Option<Identity> {
        lock(&self.inner.identity).clone()
    }

    /// Binds `identity`, returning the previous binding.
    pub(crate) fn set_identity(&self, identity: Identity) -> Option<Identity> {
        lock(&self.inner.identity).replace(identity)
    }

    /// Pushes `data` without a correlation id.
    pub fn send(&self, data: Value) -> Result<()> {
        self.send_packet(&Packet::push(data))
    }

    /// Sends `data` under the given correlation id.
    pub fn reply(&self, uid: Option<CorrelationId>, data: Value) -> Result<()> {
        self.send_packet(&Packet { uid, data })
    }

    pub fn send_packet(&self, packet: &Packet) -> Result<()> {
        let frame = codec::encode(packet)?;
        match lock(&self.inner.writer).as_ref() {
            Some(writer) => writer.send(frame).map_err(|_| ServerError::ConnectionClosed),
            None => Err(ServerError::ConnectionClosed),
        }
    }

    /// True until the connection starts closing.
    pub fn is_open(&self) -> bool {
        lock(&self.inner.writer)
            .as_ref()
            .is_some_and(|writer| !writer.is_closed())
    }

    /// Closes the connection once queued frames are written.
    pub fn close(&self) {
        self.inner.closing.cancel();
    }

    /// Marks the connection as errored: it is unregistered and its socket
    /// destroyed without flushing.
    pub fn fault(&self) {
        self.inner.faulted.cancel();
    }

    pub(crate) fn closing(&self) -> &CancellationToken {
        &self.inner.closing
    }

    pub(crate) fn faulted(&self) -> &CancellationToken {
        &self.inner.faulted
    }

    /// Stops accepting frames; the writer task ends once it drains.
    pub(crate) fn detach_writer(&self) {
        lock(&self.inner.writer).take();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("identity", &self.identity())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A decoded frame and the connection it arrived on.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub packet: Packet,
    pub connection: Connection,
}

impl Inbound {
    /// Answers the sender, echoing the inbound correlation id.
    pub fn reply(&self, data: Value) -> Result<()> {
        self.connection.reply(self.packet.uid.clone(), data)
    }

    pub fn control_message(&self) -> Option<ControlMessage> {
        self.packet.control_message()
    }

    pub fn data(&self) -> &Value {
        &self.packet.data
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
