//! VoiceRAG Relay Library Crate
//!
//! Configuration, upstream credentials, the HTTP tool catalog, and the
//! WebSocket relay itself. The `relay` binary is a thin wrapper around this
//! library.

pub mod config;
pub mod credentials;
pub mod router;
pub mod state;
pub mod tools;
pub mod ws;
