//! Transport seam between the protocol engine and the network.
//!
//! The engine only ever talks to a [`Transport`]; it never performs raw
//! socket calls. The TCP implementation queues outbound frames into a
//! writer task so there is a single in-flight send per connection, with
//! completions pulling the next queued frame.

use crate::protocol::{codec, Frame};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

/// Outbound half of a connection as seen by the engine.
pub trait Transport: Send + Sync + 'static {
    /// Whether the link is still believed usable.
    fn connected(&self) -> bool;

    /// Queue a frame for transmission. Failures surface as a disconnect,
    /// not as an error to the caller.
    fn send(&self, frame: Frame);

    /// Time since the last frame was queued; drives outgoing-heartbeat
    /// suppression when regular traffic is already flowing.
    fn since_last_send(&self) -> Duration;

    /// Tear the link down. Safe to call more than once.
    fn shutdown(&self);
}

enum WriterCommand {
    Frame(Frame),
    Close,
}

/// TCP-backed transport: an unbounded queue drained by one writer task.
pub struct TcpTransport {
    tx: mpsc::UnboundedSender<WriterCommand>,
    connected: AtomicBool,
    last_send: Mutex<Instant>,
}

impl TcpTransport {
    /// Take ownership of the write half and spawn the writer task.
    pub fn start(write_half: OwnedWriteHalf, peer: SocketAddr) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            connected: AtomicBool::new(true),
            last_send: Mutex::new(Instant::now()),
        });
        tokio::spawn(writer_loop(rx, write_half, Arc::clone(&transport), peer));
        transport
    }
}

impl Transport for TcpTransport {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, frame: Frame) {
        if !self.connected() {
            return;
        }
        *self.last_send.lock() = Instant::now();
        let _ = self.tx.send(WriterCommand::Frame(frame));
    }

    fn since_last_send(&self) -> Duration {
        self.last_send.lock().elapsed()
    }

    fn shutdown(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(WriterCommand::Close);
        }
    }
}

async fn writer_loop(
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    mut write_half: OwnedWriteHalf,
    transport: Arc<TcpTransport>,
    peer: SocketAddr,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame(frame) => {
                let bytes = codec::encode(&frame);
                if let Err(err) = write_half.write_all(&bytes).await {
                    tracing::debug!(%peer, "write failed: {err}");
                    break;
                }
            }
            WriterCommand::Close => break,
        }
    }
    transport.connected.store(false, Ordering::Release);
    let _ = write_half.shutdown().await;
}
