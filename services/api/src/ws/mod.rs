//! WebSocket Relay
//!
//! - `upstream`: Builds the upstream realtime URL and opens authenticated connections.
//! - `session`: Pairs a client socket with an upstream one and pumps frames
//!   through the event transforms.

pub mod session;
pub mod upstream;

pub use session::{RelaySession, realtime_handler};
