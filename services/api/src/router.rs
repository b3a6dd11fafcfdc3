//! Axum Router Configuration
//!
//! The relay exposes a single WebSocket endpoint. When a static directory is
//! configured, every other path is served from it.

use crate::{state::AppState, ws::realtime_handler};
use axum::{Router, routing::get};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/realtime", get(realtime_handler))
        .with_state(app_state);

    match static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            router.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => router,
    }
}
