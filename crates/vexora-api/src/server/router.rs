//! Application router configuration.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::types::{ServerState, MAX_REQUEST_BODY_SIZE};
use crate::handlers::{basic, commands, devices};

/// Create the application router with the given state.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(basic::health_handler))
        .route("/api/v1/devices", get(devices::list_devices_handler))
        .route("/api/v1/devices/:device_id", get(devices::get_device_handler))
        .route("/api/v1/dev/:device_id/cmd", post(commands::send_command_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
