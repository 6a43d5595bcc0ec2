//! Network edge: the transport seam and the per-connection driver.

pub mod driver;
pub mod transport;

pub use driver::serve_connection;
pub use transport::{TcpTransport, Transport};
