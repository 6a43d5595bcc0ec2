//! STOMP wire protocol: frame model and incremental codec.

pub mod codec;
pub mod frame;

pub use codec::{encode, FrameDecoder, FrameError};
pub use frame::{headers, Command, Frame, Headers};
