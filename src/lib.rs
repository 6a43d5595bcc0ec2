#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: some functions are inherently complex
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
// Control flow style
#![allow(clippy::single_match_else)]
#![allow(clippy::match_same_arms)]
// Large types
#![allow(clippy::large_futures)]

//! Tachyon - STOMP message broker.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::runtime` - Listener and maintenance orchestration
//!
//! ## Protocol
//! - `protocol::frame` - Frame model, commands, and headers
//! - `protocol::codec` - Incremental wire decoding and encoding
//!
//! ## Sessions
//! - `session::connection` - Per-connection protocol state machine
//! - `session::session` - Reconnectable client identity
//! - `session::subscription` - Delivery tracking and acknowledgment
//!
//! ## Broker
//! - `broker::store` - Session and destination registries, maintenance
//! - `broker::destination` - Queue and topic delivery
//! - `broker::auth` - Connection authentication
//!
//! ## Networking
//! - `net::transport` - Outbound transport seam
//! - `net::driver` - Per-connection async driver

// Core infrastructure
pub mod core;

// Protocol engine
pub mod protocol;

// Sessions & subscriptions
pub mod session;

// Broker state
pub mod broker;

// Networking
pub mod net;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, runtime};
pub use self::core::{Broker, BrokerHandle, Config};
pub use broker::{BrokerStore, StoreConfig};
pub use protocol::{Command, Frame, FrameDecoder};
pub use session::{Connection, ConnectionSettings, ConnectionState};
