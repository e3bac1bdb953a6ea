//! HTTP and WebSocket surface of the daemon.
//!
//! `/ws` carries the terminal stream, `/api/*` the transcript, summary and
//! monitoring endpoints; everything else is served from the public directory.

mod api;
mod ws;

use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::archive::FileArchive;
use crate::bridge::BridgeController;
use crate::monitor::Monitor;
use crate::summarizer::Summarizer;

pub use api::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub bridge: BridgeController,
    pub summarizer: Arc<Summarizer>,
    pub transcripts: FileArchive,
    pub monitor: Arc<Mutex<Monitor>>,
}

impl AppState {
    pub fn new(bridge: BridgeController, summarizer: Summarizer, transcripts: FileArchive) -> Self {
        Self {
            bridge,
            summarizer: Arc::new(summarizer),
            transcripts,
            monitor: Arc::new(Mutex::new(Monitor::new())),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/status", get(api::status))
        .route("/api/logs", get(api::list_logs))
        .route("/api/logs/{filename}", get(api::read_log))
        .route("/api/summarize", post(api::summarize))
        .route("/api/summaries", get(api::list_summaries))
        .route("/api/summaries/{filename}", get(api::read_summary))
        .route("/api/monitor", get(api::monitor))
        .fallback_service(ServeDir::new(public_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
