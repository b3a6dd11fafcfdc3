//! Per-direction event rewriting.
//!
//! [`ServerBoundTransform`] handles client→upstream traffic and enforces the
//! session policy. [`ClientBoundTransform`] handles upstream→client traffic,
//! hides the function-call machinery and executes tools. Neither touches a
//! socket: the client-bound side reports everything it wants sent as an
//! ordered list of [`Outbound`] frames.

mod client_bound;
mod server_bound;

pub use client_bound::ClientBoundTransform;
pub use server_bound::ServerBoundTransform;

/// A text frame the relay must send, and which leg it goes out on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Upstream(String),
    Client(String),
}
