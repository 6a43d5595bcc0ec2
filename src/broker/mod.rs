//! Broker-wide state: destinations, the session/destination registries, and
//! authentication.

pub mod auth;
pub mod destination;
pub mod store;

pub use auth::{AllowAll, Authenticator, StaticCredentials};
pub use destination::{parse_destination, Destination};
pub use store::{BrokerStore, CleanupReport, StoreConfig};
