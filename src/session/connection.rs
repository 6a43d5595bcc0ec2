//! Per-connection protocol state machine.
//!
//! One instance exists per transport link. The driver serializes calls into
//! this type (one frame handled to completion before the next) and wires
//! timer expirations to the `on_*` callbacks, so the state machine itself
//! stays synchronous and testable without sockets.

use crate::broker::auth::Authenticator;
use crate::broker::store::BrokerStore;
use crate::net::transport::Transport;
use crate::protocol::{headers, Command, Frame, FrameError};
use crate::session::session::Session;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ExpectingConnect,
    Connected,
    ShuttingDown,
}

/// Negotiated heartbeat intervals in milliseconds, from the server's
/// perspective. Zero disables the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatPlan {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartbeatPlan {
    pub fn outgoing(&self) -> Option<Duration> {
        (self.outgoing_ms > 0).then(|| Duration::from_millis(self.outgoing_ms))
    }

    pub fn incoming(&self) -> Option<Duration> {
        (self.incoming_ms > 0).then(|| Duration::from_millis(self.incoming_ms))
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// Parse a `heart-beat` header value `"<outgoing>,<incoming>"`. Malformed
/// components read as 0 (disabled).
pub fn parse_heart_beat(value: &str) -> (u64, u64) {
    let mut parts = value.splitn(2, ',');
    let outgoing = parts
        .next()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let incoming = parts
        .next()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (outgoing, incoming)
}

/// Negotiate effective intervals: a direction is disabled if either side
/// offered 0 for it, otherwise the max of the two values wins. The client's
/// incoming pairs with the server's outgoing and vice versa.
pub fn negotiate(client_outgoing: u64, client_incoming: u64, server: HeartbeatPlan) -> HeartbeatPlan {
    let outgoing = if server.outgoing_ms == 0 || client_incoming == 0 {
        0
    } else {
        server.outgoing_ms.max(client_incoming)
    };
    let incoming = if server.incoming_ms == 0 || client_outgoing == 0 {
        0
    } else {
        server.incoming_ms.max(client_outgoing)
    };
    HeartbeatPlan {
        outgoing_ms: outgoing,
        incoming_ms: incoming,
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// How long to wait for the initial CONNECT/STOMP frame.
    pub connect_timeout: Duration,
    /// The server's preferred heartbeat pair.
    pub server_heartbeat: HeartbeatPlan,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            server_heartbeat: HeartbeatPlan {
                outgoing_ms: 30_000,
                incoming_ms: 30_000,
            },
        }
    }
}

pub struct Connection {
    peer: String,
    state: ConnectionState,
    transport: Arc<dyn Transport>,
    store: Arc<BrokerStore>,
    authenticator: Arc<dyn Authenticator>,
    settings: ConnectionSettings,
    session: Option<Arc<Session>>,
    heartbeat: HeartbeatPlan,
    frames_in: u64,
}

impl Connection {
    pub fn new(
        peer: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<BrokerStore>,
        authenticator: Arc<dyn Authenticator>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            peer: peer.into(),
            state: ConnectionState::ExpectingConnect,
            transport,
            store,
            authenticator,
            settings,
            session: None,
            heartbeat: HeartbeatPlan::default(),
            frames_in: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn heartbeat_plan(&self) -> HeartbeatPlan {
        self.heartbeat
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.clone()
    }

    /// Handle one decoded inbound frame.
    pub fn on_frame(&mut self, frame: Frame) {
        self.frames_in += 1;
        match self.state {
            ConnectionState::ShuttingDown => {
                tracing::debug!(peer = %self.peer, command = %frame.command, "discarding frame after shutdown");
            }
            ConnectionState::ExpectingConnect => self.on_connect_frame(frame),
            ConnectionState::Connected => self.on_application_frame(frame),
        }
    }

    fn on_connect_frame(&mut self, frame: Frame) {
        match frame.command() {
            Some(Command::Connect | Command::Stomp) => {}
            _ => {
                self.fail(
                    Some(&frame),
                    &format!("expected CONNECT or STOMP, got {}", frame.command),
                );
                return;
            }
        }
        if !self
            .authenticator
            .authenticate(frame.header(headers::LOGIN), frame.header(headers::PASSCODE))
        {
            self.fail(Some(&frame), "authentication failed");
            return;
        }
        let session = match frame.header(headers::SESSION) {
            Some(id) => match self.store.find_session(id) {
                Some(session) => session,
                None => {
                    self.fail(Some(&frame), &format!("unknown session {id}"));
                    return;
                }
            },
            None => self.store.create_session(),
        };
        if let Some(client_id) = frame.header(headers::CLIENT_ID) {
            session.set_client_id(client_id);
        }
        if session.attach(Arc::clone(&self.transport)).is_err() {
            self.fail(Some(&frame), "session already has an attached connection");
            return;
        }
        let (client_outgoing, client_incoming) = frame
            .header(headers::HEART_BEAT)
            .map(parse_heart_beat)
            .unwrap_or((0, 0));
        self.heartbeat = negotiate(client_outgoing, client_incoming, self.settings.server_heartbeat);
        let connected = Frame::new(Command::Connected)
            .with_header(headers::SESSION, session.id())
            .with_header(headers::HEART_BEAT, self.heartbeat.header_value());
        self.transport.send(connected);
        tracing::info!(
            peer = %self.peer,
            session = %session.id(),
            heartbeat = %self.heartbeat.header_value(),
            "client connected"
        );
        self.session = Some(session);
        self.state = ConnectionState::Connected;
    }

    fn on_application_frame(&mut self, frame: Frame) {
        if frame.is_heartbeat() {
            // The driver already reset the incoming deadline.
            return;
        }
        if frame.command() == Some(Command::Disconnect) {
            self.on_disconnect(&frame);
            return;
        }
        let Some(session) = self.session.clone() else {
            self.fail(Some(&frame), "no session attached");
            return;
        };
        // Nothing thrown by frame processing may escape and take down the
        // connection task; violations become ERROR frames here.
        if let Err(violation) = session.process_frame(&self.store, &frame) {
            tracing::warn!(peer = %self.peer, session = %session.id(), "protocol violation: {violation}");
            self.send_error(&violation.message, Some(&frame));
            if violation.fatal {
                self.shutdown();
            }
        }
    }

    fn on_disconnect(&mut self, frame: &Frame) {
        if let Some(receipt) = frame.header(headers::RECEIPT) {
            self.transport.send(Frame::receipt(receipt));
        }
        let keep_session = frame
            .header(headers::KEEP_SESSION)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if let Some(session) = self.session.take() {
            session.detach();
            if keep_session {
                tracing::info!(peer = %self.peer, session = %session.id(), "session kept for reconnection");
            } else {
                self.store.remove_session(session.id());
                session.dispose(&self.store);
                tracing::info!(peer = %self.peer, session = %session.id(), "session removed on disconnect");
            }
        }
        self.state = ConnectionState::ShuttingDown;
        self.transport.shutdown();
    }

    /// The connect-timeout timer fired; only meaningful before CONNECT.
    pub fn on_connect_timeout(&mut self) {
        if self.state != ConnectionState::ExpectingConnect {
            return;
        }
        self.fail(None, "timed out waiting for CONNECT");
    }

    /// No inbound traffic within the negotiated window: peer is dead.
    pub fn on_incoming_heartbeat_timeout(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        tracing::warn!(peer = %self.peer, "incoming heart-beat timeout");
        self.send_error("heart-beat timeout", None);
        self.shutdown();
    }

    /// The outgoing-heartbeat timer fired; send a bare heartbeat unless
    /// other traffic already went out within the interval.
    pub fn on_outgoing_heartbeat_tick(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        if let Some(interval) = self.heartbeat.outgoing() {
            if self.transport.since_last_send() >= interval {
                self.transport.send(Frame::heartbeat());
            }
        }
    }

    /// The transport dropped underneath us. The session stays resolvable
    /// for reconnection until the store's idle eviction removes it.
    pub fn on_transport_closed(&mut self) {
        if self.state != ConnectionState::ShuttingDown {
            tracing::info!(peer = %self.peer, frames_in = self.frames_in, "transport closed");
        }
        self.shutdown();
    }

    /// The inbound byte stream is unparseable; there is no way to resync.
    pub fn on_decode_error(&mut self, err: &FrameError) {
        tracing::warn!(peer = %self.peer, "frame decode failed: {err}");
        self.send_error(&format!("malformed frame: {err}"), None);
        self.shutdown();
    }

    /// Idempotent teardown: detaches the session (keeping it available for
    /// reconnection) and closes the transport exactly once.
    pub fn shutdown(&mut self) {
        if self.state == ConnectionState::ShuttingDown {
            return;
        }
        self.state = ConnectionState::ShuttingDown;
        if let Some(session) = self.session.take() {
            session.detach();
        }
        self.transport.shutdown();
    }

    fn fail(&mut self, in_reply_to: Option<&Frame>, message: &str) {
        tracing::warn!(peer = %self.peer, "{message}");
        self.send_error(message, in_reply_to);
        self.shutdown();
    }

    fn send_error(&self, message: &str, in_reply_to: Option<&Frame>) {
        if self.transport.connected() {
            self.transport.send(Frame::error(message, in_reply_to));
        }
    }
}
