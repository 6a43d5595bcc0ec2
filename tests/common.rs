//! Common test harness utilities for integration tests.
//!
//! Provides a recording in-memory transport and helpers for driving the
//! connection state machine without sockets.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tachyon::broker::auth::{AllowAll, Authenticator};
use tachyon::broker::store::{BrokerStore, StoreConfig};
use tachyon::net::Transport;
use tachyon::protocol::{headers, Command, Frame};
use tachyon::session::{Connection, ConnectionSettings};

/// In-memory transport that records every outbound frame.
pub struct MockTransport {
    sent: Mutex<Vec<Frame>>,
    connected: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    pub fn last(&self) -> Frame {
        self.sent.lock().last().cloned().expect("no frames sent")
    }

    /// Frames with the given command, in send order.
    pub fn frames(&self, command: &str) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, frame: Frame) {
        self.sent.lock().push(frame);
    }

    fn since_last_send(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

pub fn store() -> Arc<BrokerStore> {
    Arc::new(BrokerStore::new(StoreConfig::default()))
}

pub fn connection(transport: &Arc<MockTransport>, store: &Arc<BrokerStore>) -> Connection {
    connection_with_auth(transport, store, Arc::new(AllowAll))
}

pub fn connection_with_auth(
    transport: &Arc<MockTransport>,
    store: &Arc<BrokerStore>,
    authenticator: Arc<dyn Authenticator>,
) -> Connection {
    Connection::new(
        "test-peer",
        Arc::clone(transport) as Arc<dyn Transport>,
        Arc::clone(store),
        authenticator,
        ConnectionSettings::default(),
    )
}

/// Open a connection and drive CONNECT through it, returning the session id
/// the broker assigned.
pub fn connected_client(
    store: &Arc<BrokerStore>,
) -> (Arc<MockTransport>, Connection, String) {
    let transport = MockTransport::new();
    let mut conn = connection(&transport, store);
    conn.on_frame(Frame::new(Command::Connect));
    let session_id = transport
        .last()
        .header(headers::SESSION)
        .expect("CONNECTED carries a session header")
        .to_string();
    (transport, conn, session_id)
}

/// SUBSCRIBE with explicit client acknowledgment.
pub fn subscribe(conn: &mut Connection, id: &str, destination: &str) {
    conn.on_frame(
        Frame::new(Command::Subscribe)
            .with_header(headers::ID, id)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::ACK, "client"),
    );
}

pub fn send_text(conn: &mut Connection, destination: &str, text: &str) {
    conn.on_frame(
        Frame::new(Command::Send)
            .with_header(headers::DESTINATION, destination)
            .with_body(bytes::Bytes::from(text.to_string())),
    );
}
