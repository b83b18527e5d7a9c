//! WebSocket relay between tank firmware and browser controllers.
//!
//! Tanks connect on `/ws/tank/{id}` and stream status; controllers connect on
//! `/ws/control`, pick a tank, and send motion commands that are normalized
//! and forwarded to that tank's socket.

pub mod cli;
pub mod config;
pub mod connection;
pub mod controllers;
pub mod error;
pub mod handlers;
pub mod normalize;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use crate::config::Config;
pub use crate::error::{RelayError, TransportError};
pub use crate::handlers::AppState;
pub use crate::relay::Relay;

/// Build the HTTP/WebSocket router for a relay.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/ws/tank/:tank_id", get(handlers::device_ws_handler))
        .route("/ws/control", get(handlers::control_ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
