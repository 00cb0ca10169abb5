// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tether_core::RegisterRequest;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const WAIT: Duration = Duration::from_secs(5);

/// Deterministic ids: "id-0", "id-1", ...
#[derive(Default)]
struct CountingIds(AtomicU64);

impl IdSource for CountingIds {
    fn next_id(&self) -> String {
        format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// One accepted connection, seen from the server side.
struct FakePeer {
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: Vec<Packet>,
}

impl FakePeer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("no connection")
            .unwrap();
        FakePeer {
            stream,
            decoder: FrameDecoder::new(),
            pending: Vec::new(),
        }
    }

    async fn next(&mut self) -> Packet {
        let mut buf = [0u8; 4096];
        while self.pending.is_empty() {
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("no frame")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            for frame in self.decoder.feed(&buf[..n]) {
                self.pending.push(frame.unwrap());
            }
        }
        self.pending.remove(0)
    }

    async fn expect_register(&mut self) -> RegisterRequest {
        let packet = self.next().await;
        assert!(packet.uid.is_none());
        match packet.control_message() {
            Some(ControlMessage::Register(request)) => request,
            other => panic!("expected REGISTER, got {other:?}"),
        }
    }

    async fn write(&mut self, packet: &Packet) {
        self.stream
            .write_all(&codec::encode(packet).unwrap())
            .await
            .unwrap();
    }

    async fn ack(&mut self) {
        let ack = Packet::control(None, &ControlMessage::Registered).unwrap();
        self.write(&ack).await;
    }
}

async fn listener() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut config = ClientConfig::new("127.0.0.1", port);
    config.identity = Some("worker-1".to_string());
    config.reconnect_interval_ms = 10;
    config.reconnect_interval_max_ms = 50;
    (listener, config)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no event")
        .expect("event channel closed")
}

async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn registers_with_identity_and_token() {
    let (listener, mut config) = listener().await;
    config.token = Some("s3cret".to_string());
    let (client, mut events) = Client::new(config);
    assert_eq!(client.state(), ConnectionState::Idle);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    let request = peer.expect_register().await;
    assert_eq!(request.uid, Identity::from("worker-1"));
    assert_eq!(request.token.as_deref(), Some("s3cret"));

    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    assert_eq!(client.state(), ConnectionState::Registering);

    peer.ack().await;
    assert!(matches!(next_event(&mut events).await, ClientEvent::Registered));
    match next_event(&mut events).await {
        ClientEvent::Message(packet) => {
            assert_eq!(packet.control_message(), Some(ControlMessage::Registered));
        }
        other => panic!("expected REGISTERED message, got {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Connected);

    client.stop().await;
}

#[tokio::test]
async fn identity_defaults_to_generated_id() {
    let (_listener, mut config) = listener().await;
    config.identity = None;
    let (client, _events) = Client::with_id_source(config, Arc::new(CountingIds::default()));
    assert_eq!(client.identity().as_str(), "id-0");
}

#[tokio::test]
async fn starting_twice_fails() {
    let (_listener, config) = listener().await;
    let (client, _events) = Client::new(config);
    client.start().unwrap();
    assert!(matches!(client.start(), Err(ClientError::AlreadyStarted)));
    client.stop().await;
}

#[tokio::test]
async fn invalid_config_is_rejected_at_start() {
    let (_listener, mut config) = listener().await;
    config.reconnect_interval_factor = 0.5;
    let (client, _events) = Client::new(config);
    assert!(matches!(
        client.start(),
        Err(ClientError::Core(tether_core::Error::Config(_)))
    ));
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn queued_packets_follow_register_in_send_order() {
    let (listener, config) = listener().await;
    let (client, _events) = Client::with_id_source(config, Arc::new(CountingIds::default()));

    for n in 0..3 {
        client.send(json!({ "n": n })).unwrap();
    }
    assert_eq!(client.pending_count(), 3);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;
    for n in 0..3 {
        let packet = peer.next().await;
        assert_eq!(packet.data, json!({ "n": n }));
        assert_eq!(packet.uid, Some(CorrelationId::new(format!("id-{n}"))));
    }
    assert_eq!(client.pending_count(), 0);

    client.stop().await;
}

#[tokio::test]
async fn request_resolves_with_correlated_reply() {
    let (listener, config) = listener().await;
    let (client, mut events) = Client::new(config);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;
    peer.ack().await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Registered)).await;

    let reply = client.request(json!("ping"));
    let packet = peer.next().await;
    assert_eq!(packet.data, json!("ping"));

    // An unrelated push first, then the reply.
    peer.write(&Packet::push(json!("noise"))).await;
    peer.write(&Packet::request(packet.uid.clone().unwrap(), json!("pong")))
        .await;

    let response = tokio::time::timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(response.data, json!("pong"));
    assert_eq!(response.uid, packet.uid);
    assert_eq!(client.pending_count(), 0);

    client.stop().await;
}

#[tokio::test]
async fn request_without_reply_times_out() {
    let (listener, mut config) = listener().await;
    config.timeout_ms = 50;
    let (client, _events) = Client::new(config);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;

    let result = tokio::time::timeout(WAIT, client.request(json!("ping")))
        .await
        .unwrap();
    match result {
        Err(err @ ClientError::Timeout) => assert_eq!(err.to_string(), "Timeout reached"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(client.pending_count(), 0);

    client.stop().await;
}

#[tokio::test]
async fn reconnects_and_runs_first_connect_once() {
    let (listener, config) = listener().await;
    let (client, mut events) = Client::new(config);
    let first_connects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&first_connects);
    client
        .start_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    drop(peer);
    wait_for(&mut events, |e| matches!(e, ClientEvent::Closed)).await;

    // Sent while the client is between connections.
    client.send(json!("while away")).unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    assert_eq!(peer.expect_register().await.uid.as_str(), "worker-1");
    wait_for(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    let packet = peer.next().await;
    assert_eq!(packet.data, json!("while away"));

    assert_eq!(first_connects.load(Ordering::SeqCst), 1);
    client.stop().await;
}

#[tokio::test]
async fn rejection_is_reported_and_stream_stays_open() {
    let (listener, config) = listener().await;
    let (client, mut events) = Client::new(config);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;
    let rejection = ControlMessage::rejected(tether_core::Rejection::TokenMismatch);
    peer.write(&Packet::control(None, &rejection).unwrap()).await;

    match wait_for(&mut events, |e| matches!(e, ClientEvent::Rejected(_))).await {
        ClientEvent::Rejected(message) => assert_eq!(message, "tokens mismatch!"),
        _ => unreachable!(),
    }
    assert_eq!(client.state(), ConnectionState::Registering);

    client.send(json!("still here")).unwrap();
    assert_eq!(peer.next().await.data, json!("still here"));

    client.stop().await;
}

#[tokio::test]
async fn undecodable_frame_is_a_warning() {
    let (listener, config) = listener().await;
    let (client, mut events) = Client::new(config);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;
    peer.stream.write_all(b"3#abc").await.unwrap();
    peer.write(&Packet::push(json!("after"))).await;

    wait_for(&mut events, |e| matches!(e, ClientEvent::Warning(ClientError::Core(_)))).await;
    match wait_for(&mut events, |e| matches!(e, ClientEvent::Message(_))).await {
        ClientEvent::Message(packet) => assert_eq!(packet.data, json!("after")),
        _ => unreachable!(),
    }

    client.stop().await;
}

#[tokio::test]
async fn stop_fails_pending_requests_and_later_sends() {
    let (listener, config) = listener().await;
    let (client, mut events) = Client::new(config);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;
    let pending = client.request(json!("never answered"));
    peer.next().await;

    client.stop().await;
    assert!(matches!(pending.await, Err(ClientError::Stopped)));
    assert_eq!(client.state(), ConnectionState::Stopped);
    assert!(matches!(client.send(json!(1)), Err(ClientError::Stopped)));
    assert!(matches!(
        client.request(json!(2)).await,
        Err(ClientError::Stopped)
    ));
    wait_for(&mut events, |e| matches!(e, ClientEvent::Closed)).await;

    // Idempotent.
    client.stop().await;
    assert!(matches!(client.start(), Err(ClientError::Stopped)));
}

#[tokio::test]
async fn stop_drains_queued_frames_before_closing() {
    let (listener, config) = listener().await;
    let (client, mut events) = Client::new(config);
    client.start().unwrap();

    let mut peer = FakePeer::accept(&listener).await;
    peer.expect_register().await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Connected)).await;

    for n in 0..50 {
        client.send(json!(n)).unwrap();
    }
    client.stop().await;

    for n in 0..50 {
        assert_eq!(peer.next().await.data, json!(n));
    }
    let mut buf = [0u8; 16];
    assert_eq!(peer.stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn unreachable_server_keeps_retrying() {
    let (listener, config) = listener().await;
    drop(listener);
    let (client, mut events) = Client::new(config);
    client.start().unwrap();

    wait_for(&mut events, |e| matches!(e, ClientEvent::Warning(_))).await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Warning(_))).await;
    assert!(matches!(
        client.state(),
        ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
    ));

    client.stop().await;
    assert_eq!(client.state(), ConnectionState::Stopped);
    // No stream was ever established, so nothing was closed.
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ClientEvent::Closed), "unexpected {event:?}");
    }
}

#[tokio::test]
async fn session_opened_after_stop_shuts_down() {
    let (listener, config) = listener().await;
    let (client, _events) = Client::new(config);
    client.inner.lock().phase = ConnectionState::Stopped;

    let addr = listener.local_addr().unwrap();
    let (accepted, dialed) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (mut server_side, _) = accepted.unwrap();
    let stream: BoxStream = Box::new(dialed.unwrap());

    tokio::time::timeout(WAIT, run_session(&client.inner, stream, b"unused"))
        .await
        .expect("session kept running after stop");

    // Nothing, not even REGISTER, was written before the stream closed.
    let mut buf = [0u8; 16];
    assert_eq!(server_side.read(&mut buf).await.unwrap(), 0);
    assert!(client.inner.lock().writer.is_none());
}
