// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tether server implementation.
//!
//! Accepts connections, decodes frames, registers client identities and
//! routes server-initiated packets to live connections or the offline queue.
//!
//! Each accepted socket gets its own task, which owns the read half and the
//! frame decoder. Writes go through the connection's writer task. Registry
//! and offline queue share one lock, so a registration acknowledgement and
//! the queued packets that follow it cannot interleave with a concurrent
//! [`Server::send_to`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tether_core::net::{self, spawn_writer};
use tether_core::{
    tls, ControlMessage, CorrelationId, FrameDecoder, Identity, Packet, RegisterRequest,
    Rejection, ServerConfig,
};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::Authorizer;
use crate::error::{Result, ServerError};
use crate::offline::{OfflineQueue, QueueError};
use crate::registry::{Admission, Registry};
use crate::router::{Connection, ConnectionId, Inbound};

const READ_BUFFER_SIZE: usize = 16 * 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Time a closing connection gets to flush its queued frames.
const CLOSE_GRACE: Duration = Duration::from_secs(5);
/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Events sent from connection tasks to the owner.
#[derive(Debug)]
pub enum ServerEvent {
    /// A socket was accepted (and its TLS handshake completed).
    Connection(Connection),
    /// A connection registered; its identity is set.
    Registered(Connection),
    /// Any decoded frame, REGISTER included.
    Message(Inbound),
    Closed(Connection),
    /// Non-fatal fault: socket error, bad frame, failed snapshot write.
    Warning(ServerError),
}

/// Outcome of [`Server::send_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the identity's live connection.
    Sent,
    /// Stored in the offline queue.
    Queued,
    /// No live connection and no offline queue configured.
    Dropped,
}

#[derive(Default)]
struct State {
    registry: Registry,
    offline: Option<OfflineQueue>,
    local_addr: Option<SocketAddr>,
    authorizer: Option<Arc<dyn Authorizer>>,
    started: bool,
    stopped: bool,
    background: Vec<JoinHandle<()>>,
}

struct Inner {
    config: ServerConfig,
    events: mpsc::UnboundedSender<ServerEvent>,
    state: Mutex<State>,
    cancel: CancellationToken,
    connections: TaskTracker,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

/// A tether server.
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Creates a server and the receiver for its events.
    ///
    /// Nothing is bound until [`Server::start`].
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            config,
            events,
            state: Mutex::new(State::default()),
            cancel: CancellationToken::new(),
            connections: TaskTracker::new(),
            next_id: AtomicU64::new(1),
        };
        (
            Server {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    /// Installs the registration authorizer.
    pub fn with_authorizer(self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.set_authorizer(authorizer);
        self
    }

    pub fn set_authorizer(&self, authorizer: Arc<dyn Authorizer>) {
        self.inner.lock().authorizer = Some(authorizer);
    }

    /// Binds the listener, loads the offline queue and starts serving.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn start(&self) -> Result<SocketAddr> {
        let config = &self.inner.config;
        config.validate()?;
        let acceptor = config.tls.as_ref().map(tls::server_acceptor).transpose()?;

        {
            let mut state = self.inner.lock();
            if state.stopped {
                return Err(ServerError::Stopped);
            }
            if state.started {
                return Err(ServerError::AlreadyStarted);
            }
            state.started = true;
        }

        let listener = match TcpListener::bind((config.host.as_str(), config.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.lock().started = false;
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        info!("Listening on: {}", addr);

        let offline = config.queue_path().map(|path| {
            let mut queue = OfflineQueue::new(path, config.retention());
            match queue.load() {
                Ok(count) => info!(
                    "Loaded {} offline packets from {}",
                    count,
                    queue.path().display()
                ),
                Err(e) => {
                    warn!(
                        "Ignoring unreadable offline queue {}: {}",
                        queue.path().display(),
                        e
                    );
                    self.inner.emit(ServerEvent::Warning(e.into()));
                }
            }
            queue
        });

        let mut state = self.inner.lock();
        state.local_addr = Some(addr);
        state.offline = offline;
        let accept = tokio::spawn(run_accept(Arc::clone(&self.inner), listener, acceptor));
        let maintenance = tokio::spawn(run_maintenance(Arc::clone(&self.inner)));
        state.background = vec![accept, maintenance];
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    /// Identities with a live registered connection.
    pub fn registered(&self) -> Vec<Identity> {
        self.inner.lock().registry.identities()
    }

    /// Live connection registered as `identity`.
    pub fn connection(&self, identity: &Identity) -> Option<Connection> {
        self.inner.lock().registry.get(identity).cloned()
    }

    /// Number of packets in the offline queue.
    pub fn offline_len(&self) -> usize {
        self.inner
            .lock()
            .offline
            .as_ref()
            .map_or(0, OfflineQueue::len)
    }

    /// Pushes `data` to the client registered as `identity`.
    ///
    /// Without a live connection the packet goes to the offline queue and is
    /// delivered when that identity next registers.
    pub fn send_to(&self, identity: &Identity, mut data: Value) -> Result<Delivery> {
        let mut state = self.inner.lock();
        if let Some(connection) = state.registry.get(identity) {
            let packet = Packet::push(data);
            match connection.send_packet(&packet) {
                Ok(()) => return Ok(Delivery::Sent),
                Err(ServerError::ConnectionClosed) => data = packet.data,
                Err(e) => return Err(e),
            }
        }
        match state.offline.as_mut() {
            Some(queue) => {
                queue.push(identity.clone(), data, Utc::now());
                debug!("Queued packet for offline client {}", identity);
                Ok(Delivery::Queued)
            }
            None => {
                debug!("Dropped packet for offline client {}", identity);
                Ok(Delivery::Dropped)
            }
        }
    }

    /// Stops accepting, closes every connection once its queued frames are
    /// written, waits for all connection tasks and saves the offline queue.
    ///
    /// Calling it again returns immediately.
    pub async fn stop(&self) {
        let (started, background) = {
            let mut state = self.inner.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            (state.started, std::mem::take(&mut state.background))
        };

        self.inner.cancel.cancel();
        for task in background {
            let _ = task.await;
        }
        self.inner.connections.close();
        self.inner.connections.wait().await;

        if started {
            save_offline(&self.inner).await;
        }
        info!("Server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn run_accept(inner: Arc<Inner>, listener: TcpListener, acceptor: Option<TlsAcceptor>) {
    loop {
        let accepted = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((tcp, peer_addr)) => {
                let id = ConnectionId::new(inner.next_id.fetch_add(1, Ordering::Relaxed));
                inner.connections.spawn(handle_connection(
                    Arc::clone(&inner),
                    tcp,
                    peer_addr,
                    id,
                    acceptor.clone(),
                ));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                inner.emit(ServerEvent::Warning(e.into()));
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    /// Peer hung up, or close/stop was requested: flush and shut down.
    Graceful,
    /// Error, fault or registration deadline: drop queued frames.
    Destroyed,
}

async fn handle_connection(
    inner: Arc<Inner>,
    tcp: TcpStream,
    peer_addr: SocketAddr,
    id: ConnectionId,
    acceptor: Option<TlsAcceptor>,
) {
    let accepted = tokio::select! {
        _ = inner.cancel.cancelled() => return,
        accepted = net::accept(tcp, acceptor.as_ref(), HANDSHAKE_TIMEOUT) => accepted,
    };
    let stream = match accepted {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Rejected connection from {}: {}", peer_addr, e);
            inner.emit(ServerEvent::Warning(e.into()));
            return;
        }
    };

    let (mut reader, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(write_half, rx);
    let connection = Connection::new(id, peer_addr, tx);
    debug!("Connection {} from {}", id, peer_addr);
    inner.emit(ServerEvent::Connection(connection.clone()));

    let register_by = Instant::now() + inner.config.register_timeout();
    let deadline = tokio::time::sleep_until(register_by);
    tokio::pin!(deadline);
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let ending = loop {
        let read = tokio::select! {
            _ = inner.cancel.cancelled() => break Ending::Graceful,
            _ = connection.closing().cancelled() => break Ending::Graceful,
            _ = connection.faulted().cancelled() => break Ending::Destroyed,
            _ = &mut deadline, if connection.identity().is_none() => {
                info!("Connection {} from {} did not register in time", id, peer_addr);
                break Ending::Destroyed;
            }
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => break Ending::Graceful,
            Ok(n) => {
                for frame in decoder.feed(&buf[..n]) {
                    if connection.faulted().is_cancelled() {
                        break;
                    }
                    handle_frame(&inner, &connection, frame, register_by).await;
                }
            }
            Err(e) => {
                warn!("Client socket error from {}: {}", peer_addr, e);
                inner.emit(ServerEvent::Warning(e.into()));
                break Ending::Destroyed;
            }
        }
    };

    if let Some(identity) = connection.identity() {
        if inner.lock().registry.remove(&identity, id) {
            info!("Client {} unregistered", identity);
        }
    }

    connection.detach_writer();
    drop(reader);
    match ending {
        Ending::Graceful => {
            let abort = writer.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                abort.abort();
            }
        }
        Ending::Destroyed => writer.abort(),
    }
    debug!("Connection {} closed ({:?})", id, ending);
    inner.emit(ServerEvent::Closed(connection));
}

async fn handle_frame(
    inner: &Inner,
    connection: &Connection,
    frame: tether_core::Result<Packet>,
    register_by: Instant,
) {
    let packet = match frame {
        Ok(packet) => packet,
        Err(e) => {
            warn!(
                "Dropping undecodable frame from {}: {}",
                connection.peer_addr(),
                e
            );
            inner.emit(ServerEvent::Warning(e.into()));
            return;
        }
    };

    let register = match packet.control_message() {
        Some(ControlMessage::Register(request)) => Some((packet.uid.clone(), request)),
        _ => None,
    };
    inner.emit(ServerEvent::Message(Inbound {
        packet,
        connection: connection.clone(),
    }));

    if let Some((uid, request)) = register {
        register_client(inner, connection, uid, request, register_by).await;
    }
}

/// Runs the registration checks for one REGISTER frame.
///
/// Identity and token are checked first, then the authorizer is awaited
/// without holding the lock. The identity check is repeated at commit since
/// another connection may have registered in the meantime.
///
/// An authorizer still undecided when the server stops, the connection
/// faults or an unregistered connection reaches `register_by` is abandoned
/// and the connection destroyed.
async fn register_client(
    inner: &Inner,
    connection: &Connection,
    uid: Option<CorrelationId>,
    request: RegisterRequest,
    register_by: Instant,
) {
    let token = inner.config.token.as_deref();
    let (admission, authorizer) = {
        let state = inner.lock();
        (
            state.registry.admit(&request, token, connection.id()),
            state.authorizer.clone(),
        )
    };
    if let Admission::Reject(rejection) = admission {
        reject(connection, uid, &request, rejection);
        return;
    }

    if let Some(authorizer) = authorizer {
        let decided = tokio::select! {
            allowed = authorizer.authorize(&request, connection) => Some(allowed),
            _ = inner.cancel.cancelled() => None,
            _ = connection.faulted().cancelled() => None,
            _ = tokio::time::sleep_until(register_by), if connection.identity().is_none() => None,
        };
        match decided {
            Some(true) => {}
            Some(false) => {
                reject(connection, uid, &request, Rejection::Unauthorized);
                return;
            }
            None => {
                info!(
                    "Abandoned authorization of {} from {}",
                    request.uid,
                    connection.peer_addr()
                );
                connection.fault();
                return;
            }
        }
    }

    let acknowledged = {
        let mut state = inner.lock();
        let displaced = match state.registry.admit(&request, token, connection.id()) {
            Admission::Reject(rejection) => Err(rejection),
            Admission::Supersede(holder) => Ok(Some(holder)),
            Admission::Accept => Ok(None),
        };
        match displaced {
            Err(rejection) => Err(rejection),
            Ok(displaced) => {
                if let Some(previous) = connection.set_identity(request.uid.clone()) {
                    if previous != request.uid {
                        state.registry.remove(&previous, connection.id());
                    }
                }
                state.registry.insert(request.uid.clone(), connection.clone());

                let ack = Packet::control(uid.clone(), &ControlMessage::Registered)
                    .map_err(tether_core::Error::from)
                    .map_err(ServerError::from)
                    .and_then(|ack| connection.send_packet(&ack));
                let queued = state
                    .offline
                    .as_mut()
                    .map(|queue| queue.take_for(&request.uid))
                    .unwrap_or_default();
                let flushed = queued.len();
                for data in queued {
                    if let Err(e) = connection.send(data) {
                        debug!("Offline packet for {} lost: {}", request.uid, e);
                    }
                }
                Ok((displaced, ack, flushed))
            }
        }
    };

    match acknowledged {
        Err(rejection) => reject(connection, uid, &request, rejection),
        Ok((displaced, ack, flushed)) => {
            if let Some(holder) = displaced {
                info!(
                    "Client {} superseded connection {}",
                    request.uid,
                    holder.id()
                );
                holder.fault();
            }
            if let Err(e) = ack {
                warn!("Failed to acknowledge {}: {}", request.uid, e);
            }
            info!(
                "Client {} registered from {}",
                request.uid,
                connection.peer_addr()
            );
            if flushed > 0 {
                info!("Delivered {} offline packets to {}", flushed, request.uid);
            }
            inner.emit(ServerEvent::Registered(connection.clone()));
        }
    }
}

fn reject(
    connection: &Connection,
    uid: Option<CorrelationId>,
    request: &RegisterRequest,
    rejection: Rejection,
) {
    info!(
        "Rejected registration of {} from {}: {}",
        request.uid,
        connection.peer_addr(),
        rejection
    );
    let sent = Packet::control(uid, &ControlMessage::rejected(rejection))
        .map_err(tether_core::Error::from)
        .map_err(ServerError::from)
        .and_then(|packet| connection.send_packet(&packet));
    if let Err(e) = sent {
        debug!("Could not send rejection: {}", e);
    }
}

async fn run_maintenance(inner: Arc<Inner>) {
    let period = inner.config.save_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = ticker.tick() => save_offline(&inner).await,
        }
    }
}

/// Prunes expired packets and rewrites the snapshot.
async fn save_offline(inner: &Inner) {
    let snapshot = {
        let mut state = inner.lock();
        let Some(queue) = state.offline.as_mut() else {
            return;
        };
        let pruned = queue.prune(Utc::now());
        if pruned > 0 {
            info!("Dropped {} expired offline packets", pruned);
        }
        queue.snapshot()
    };

    let written = match snapshot {
        Ok(snapshot) => tokio::task::spawn_blocking(move || snapshot.write())
            .await
            .unwrap_or_else(|e| Err(QueueError::Io(std::io::Error::other(e)))),
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        warn!("Failed to save offline queue: {}", e);
        inner.emit(ServerEvent::Warning(e.into()));
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
