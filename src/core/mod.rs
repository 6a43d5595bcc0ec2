//! Core runtime infrastructure.
//!
//! This module contains the essential components for running the broker:
//! - `config` - Configuration parsing and validation
//! - `runtime` - Listener and maintenance-task orchestration

pub mod config;
pub mod runtime;

pub use config::Config;
pub use runtime::{init_tracing, Broker, BrokerHandle};
