//! Transport-free core of the realtime voice relay.
//!
//! The relay sits between a voice client and an upstream realtime speech
//! service. This crate holds everything that decides *what* crosses the relay:
//! event decoding, the server-enforced session policy, the tool registry and
//! the two per-direction transforms. Sockets, credentials and process setup
//! live in the service crate.

pub mod error;
pub mod event;
pub mod pending;
pub mod policy;
pub mod tool;
pub mod transform;

pub use error::RelayError;
pub use pending::{PendingToolCall, PendingToolCallTable};
pub use policy::{MaxOutputTokens, ModelFamily, SessionPolicy, VadProfile};
pub use tool::{Tool, ToolHandler, ToolRegistry, ToolResult, ToolResultDirection};
pub use transform::{ClientBoundTransform, Outbound, ServerBoundTransform};
