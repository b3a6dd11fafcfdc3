//! Shared Application State
//!
//! Everything a relay session needs, built once at startup and shared by all
//! connections.

use crate::ws::upstream::UpstreamConnector;
use std::sync::Arc;
use voicerag_core::{SessionPolicy, ToolRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub policy: Arc<SessionPolicy>,
    pub upstream: Arc<UpstreamConnector>,
}
