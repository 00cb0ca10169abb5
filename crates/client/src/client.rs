// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client connection management.
//!
//! A [`Client`] owns one logical connection to a tether server. Once started,
//! a background task dials the server, registers the client identity, pumps
//! frames in both directions and reconnects with backoff whenever the stream
//! is lost. A second task enforces request timeouts.
//!
//! Packets sent while no stream is open are kept in the request tracker and
//! written, in send order, right after the next REGISTER.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tether_core::net::spawn_writer;
use tether_core::{
    codec, BoxStream, ClientConfig, ControlMessage, CorrelationId, Dialer, FrameDecoder,
    IdSource, Identity, Packet, UidGenerator,
};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::{ClientError, Result};
use crate::event::{ClientEvent, ConnectionState};
use crate::tracker::{RequestTracker, Responder};

const READ_BUFFER_SIZE: usize = 16 * 1024;

type FirstConnect = Box<dyn FnOnce() + Send>;

/// State touched by both the owner and the background tasks.
struct Shared {
    phase: ConnectionState,
    tracker: RequestTracker,
    /// Frame queue of the open stream, if any.
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    on_first_connect: Option<FirstConnect>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    identity: Identity,
    ids: Arc<dyn IdSource>,
    events: mpsc::UnboundedSender<ClientEvent>,
    shared: Mutex<Shared>,
    /// Wakes the sweeper when the tracker deadline is armed.
    sweep: Notify,
    cancel: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: ConnectionState) {
        let mut shared = self.lock();
        if shared.phase != ConnectionState::Stopped {
            shared.phase = phase;
        }
    }
}

/// A reconnecting, registering connection to a tether server.
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a client and the receiver for its events.
    ///
    /// Nothing happens on the network until [`Client::start`].
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        Self::with_id_source(config, Arc::new(UidGenerator::new()))
    }

    /// Creates a client drawing correlation ids (and its identity, when the
    /// config has none) from `ids`.
    pub fn with_id_source(
        config: ClientConfig,
        ids: Arc<dyn IdSource>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let identity = match &config.identity {
            Some(identity) => Identity::new(identity.clone()),
            None => Identity::new(ids.next_id()),
        };
        let (events, event_rx) = mpsc::unbounded_channel();
        let tracker = RequestTracker::new(config.timeout());

        let inner = Inner {
            config,
            identity,
            ids,
            events,
            shared: Mutex::new(Shared {
                phase: ConnectionState::Idle,
                tracker,
                writer: None,
                on_first_connect: None,
                tasks: Vec::new(),
            }),
            sweep: Notify::new(),
            cancel: CancellationToken::new(),
        };

        (
            Client {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    /// Identity this client registers under.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase
    }

    /// Number of packets awaiting a reply or a connection.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().tracker.len()
    }

    /// Starts connecting in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.launch(None)
    }

    /// Like [`Client::start`], running `on_first_connect` once when the first
    /// stream opens. Reconnections do not run it again.
    pub fn start_with<F>(&self, on_first_connect: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.launch(Some(Box::new(on_first_connect)))
    }

    fn launch(&self, on_first_connect: Option<FirstConnect>) -> Result<()> {
        let config = &self.inner.config;
        config.validate()?;
        let dialer = Dialer::new(config)?;
        let register = ControlMessage::register(self.inner.identity.clone(), config.token.clone());
        let register = Packet::control(None, &register).map_err(tether_core::Error::from)?;
        let register = codec::encode(&register)?;

        let mut shared = self.inner.lock();
        match shared.phase {
            ConnectionState::Idle => {}
            ConnectionState::Stopped => return Err(ClientError::Stopped),
            _ => return Err(ClientError::AlreadyStarted),
        }
        shared.phase = ConnectionState::Connecting;
        shared.on_first_connect = on_first_connect;

        let connection = tokio::spawn(run_connection(Arc::clone(&self.inner), dialer, register));
        let sweeper = tokio::spawn(run_sweeper(Arc::clone(&self.inner)));
        shared.tasks = vec![connection, sweeper];
        Ok(())
    }

    /// Sends `data` without waiting for a reply.
    ///
    /// While disconnected the packet is held and written after the next
    /// registration, unless the request timeout expires first.
    pub fn send(&self, data: Value) -> Result<()> {
        self.submit(data, None)
    }

    /// Sends `data` and waits for the reply carrying the same correlation id.
    ///
    /// The packet is queued when this is called, not when the future is
    /// first polled. Resolves to [`ClientError::Timeout`] when no reply
    /// arrives in time and to [`ClientError::Stopped`] when the client stops.
    pub fn request(&self, data: Value) -> impl Future<Output = Result<Packet>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(data, Some(tx));
        async move {
            submitted?;
            rx.await.map_err(|_| ClientError::Stopped)?
        }
    }

    fn submit(&self, data: Value, responder: Option<Responder>) -> Result<()> {
        let uid = CorrelationId::new(self.inner.ids.next_id());
        let frame = codec::encode(&Packet::request(uid.clone(), data))?;

        let mut shared = self.inner.lock();
        if shared.phase == ConnectionState::Stopped {
            return Err(ClientError::Stopped);
        }
        let unsent = match &shared.writer {
            Some(writer) => writer.send(frame).err().map(|e| e.0),
            None => Some(frame),
        };
        if responder.is_none() && unsent.is_none() {
            return Ok(());
        }
        if shared.tracker.enqueue(uid, responder, unsent, Instant::now()) {
            self.inner.sweep.notify_one();
        }
        Ok(())
    }

    /// Stops reconnecting and closes the stream once queued frames are written.
    ///
    /// Pending requests fail with [`ClientError::Stopped`]. Calling it again
    /// returns immediately.
    pub async fn stop(&self) {
        let tasks = {
            let mut shared = self.inner.lock();
            shared.phase = ConnectionState::Stopped;
            shared.writer = None;
            shared.on_first_connect = None;
            shared.tracker.fail_all(|| ClientError::Stopped);
            std::mem::take(&mut shared.tasks)
        };
        self.inner.cancel.cancel();
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Dial, run a session, back off, repeat until cancelled.
async fn run_connection(inner: Arc<Inner>, dialer: Dialer, register: Vec<u8>) {
    let mut backoff = Backoff::from_config(&inner.config);
    let mut attempt = 0u32;

    loop {
        inner.set_phase(ConnectionState::Connecting);
        let dialed = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            result = dialer.dial() => result,
        };

        match dialed {
            Ok(stream) => {
                attempt = 0;
                info!("Connected to {}", dialer.address());
                let opened_at = Instant::now();
                run_session(&inner, stream, &register).await;
                if opened_at.elapsed() >= inner.config.reconnect_stable() {
                    backoff.reset();
                }
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", dialer.address(), e);
                inner.emit(ClientEvent::Warning(e.into()));
            }
        }

        if inner.cancel.is_cancelled() {
            return;
        }
        attempt = attempt.saturating_add(1);
        let delay = backoff.next_delay();
        info!(
            "Unable to reach server {}. Retry in {} ms.",
            dialer.address(),
            delay.as_millis()
        );
        inner.set_phase(ConnectionState::Reconnecting { attempt });
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drives one open stream until it closes or the client stops.
async fn run_session(inner: &Inner, stream: BoxStream, register: &[u8]) {
    let (mut reader, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(write_half, rx);

    // REGISTER goes first, then whatever queued up while disconnected.
    let opened = {
        let mut shared = inner.lock();
        if shared.phase == ConnectionState::Stopped {
            // Closing the channel lets the writer shut the stream down.
            drop(tx);
            None
        } else {
            let _ = tx.send(register.to_vec());
            let unsent = shared.tracker.take_unsent();
            if !unsent.is_empty() {
                debug!("Flushing {} queued packets", unsent.len());
            }
            for frame in unsent {
                let _ = tx.send(frame);
            }
            shared.writer = Some(tx);
            shared.phase = ConnectionState::Registering;
            Some(shared.on_first_connect.take())
        }
    };
    let Some(on_first_connect) = opened else {
        let _ = writer.await;
        return;
    };

    inner.emit(ClientEvent::Connected);
    if let Some(callback) = on_first_connect {
        callback();
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let stopping = loop {
        let read = tokio::select! {
            _ = inner.cancel.cancelled() => break true,
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                debug!("Server closed the connection");
                break false;
            }
            Ok(n) => {
                for frame in decoder.feed(&buf[..n]) {
                    handle_frame(inner, frame);
                }
            }
            Err(e) => {
                warn!("Connection error: {}", e);
                inner.emit(ClientEvent::Warning(e.into()));
                break false;
            }
        }
    };

    inner.lock().writer = None;
    drop(reader);
    if stopping {
        let _ = writer.await;
    } else {
        writer.abort();
    }
    inner.emit(ClientEvent::Closed);
}

fn handle_frame(inner: &Inner, frame: tether_core::Result<Packet>) {
    let packet = match frame {
        Ok(packet) => packet,
        Err(e) => {
            warn!("Dropping undecodable frame: {}", e);
            inner.emit(ClientEvent::Warning(e.into()));
            return;
        }
    };
    debug!("Received frame (uid: {:?})", packet.uid);

    if let Some(uid) = &packet.uid {
        inner.lock().tracker.resolve(uid, packet.clone());
    }

    match packet.control_message() {
        Some(ControlMessage::Registered) => {
            inner.set_phase(ConnectionState::Connected);
            info!("Registered as {}", inner.identity);
            inner.emit(ClientEvent::Registered);
        }
        Some(ControlMessage::Error { message }) => {
            warn!("Registration rejected: {}", message);
            inner.emit(ClientEvent::Rejected(message));
        }
        _ => {}
    }
    inner.emit(ClientEvent::Message(packet));
}

/// Fails requests whose timeout elapsed, sleeping until the tracker deadline.
async fn run_sweeper(inner: Arc<Inner>) {
    loop {
        let deadline = inner.lock().tracker.deadline();
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = inner.sweep.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        let evicted = inner.lock().tracker.sweep(Instant::now());
                        if evicted > 0 {
                            debug!("Evicted {} timed out packets", evicted);
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = inner.sweep.notified() => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
