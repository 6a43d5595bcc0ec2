//! Per-connection async driver.
//!
//! Owns the read half of the socket and the connection timers, feeding
//! decoded frames and timer expirations into the synchronous state machine
//! one at a time.

use crate::broker::auth::Authenticator;
use crate::broker::store::BrokerStore;
use crate::net::transport::{TcpTransport, Transport};
use crate::protocol::FrameDecoder;
use crate::session::connection::{Connection, ConnectionSettings, ConnectionState};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant, Interval};

const READ_BUFFER_SIZE: usize = 8192;

/// Drive one client connection to completion. The watch channel carries the
/// broker-wide shutdown signal.
pub async fn serve_connection(
    stream: TcpStream,
    store: Arc<BrokerStore>,
    authenticator: Arc<dyn Authenticator>,
    settings: ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::debug!("rejecting connection without peer address: {err}");
            return;
        }
    };
    tracing::debug!(%peer, "connection accepted");
    let (mut read_half, write_half) = stream.into_split();
    let transport = TcpTransport::start(write_half, peer);
    let connect_timeout = settings.connect_timeout;
    let mut connection = Connection::new(
        peer.to_string(),
        Arc::clone(&transport) as Arc<dyn Transport>,
        store,
        authenticator,
        settings,
    );
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let connect_deadline = Instant::now() + connect_timeout;
    // Armed once the heartbeat plan is negotiated.
    let mut incoming_deadline: Option<Instant> = None;
    let mut outgoing_ticker: Option<Interval> = None;

    while connection.state() != ConnectionState::ShuttingDown {
        tokio::select! {
            read = read_half.read(&mut buf) => match read {
                Ok(0) => {
                    connection.on_transport_closed();
                    break;
                }
                Ok(n) => {
                    // Any inbound bytes count as liveness, heartbeats included.
                    if let Some(window) = connection.heartbeat_plan().incoming() {
                        incoming_deadline = Some(Instant::now() + window);
                    }
                    match decoder.feed(&buf[..n]) {
                        Ok(frames) => {
                            for frame in frames {
                                let was_connected = connection.state() == ConnectionState::Connected;
                                connection.on_frame(frame);
                                if !was_connected && connection.state() == ConnectionState::Connected {
                                    let plan = connection.heartbeat_plan();
                                    incoming_deadline =
                                        plan.incoming().map(|window| Instant::now() + window);
                                    outgoing_ticker = plan.outgoing().map(|period| {
                                        interval_at(Instant::now() + period, period)
                                    });
                                }
                            }
                        }
                        Err(err) => {
                            connection.on_decode_error(&err);
                            break;
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(%peer, "read failed: {err}");
                    connection.on_transport_closed();
                    break;
                }
            },
            _ = sleep_until(connect_deadline),
                if connection.state() == ConnectionState::ExpectingConnect =>
            {
                connection.on_connect_timeout();
            }
            _ = async { sleep_until(incoming_deadline.unwrap()).await },
                if incoming_deadline.is_some() =>
            {
                connection.on_incoming_heartbeat_timeout();
            }
            _ = async { outgoing_ticker.as_mut().unwrap().tick().await },
                if outgoing_ticker.is_some() =>
            {
                connection.on_outgoing_heartbeat_tick();
            }
            // Broker shutdown; a dropped sender counts too.
            _ = shutdown.changed() => {
                connection.shutdown();
                break;
            }
        }
    }
    connection.shutdown();
    tracing::debug!(%peer, "connection finished");
}
