//! Connection state machine, sessions, and subscriptions.

pub mod connection;
pub mod session;
pub mod subscription;

pub use connection::{Connection, ConnectionSettings, ConnectionState, HeartbeatPlan};
pub use session::Session;
pub use subscription::Subscription;

use thiserror::Error;

/// A client broke the protocol contract. Tolerated violations are answered
/// with an ERROR frame and the connection stays open; fatal ones also shut
/// the connection down.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProtocolViolation {
    pub message: String,
    pub fatal: bool,
}

impl ProtocolViolation {
    pub fn tolerated(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Returned by [`Session::attach`] when a connection is already attached.
#[derive(Debug, Error)]
#[error("session already has an attached connection")]
pub struct AlreadyAttached;
