//! Health check.

use axum::{extract::State, Json};

use super::ServerState;
use crate::models::HealthStatus;

/// GET /health
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    let uptime = chrono::Utc::now().timestamp() - state.started_at;

    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        mqtt: state.connection_state(),
        uptime_secs: uptime.max(0) as u64,
        pending_commands: state.commands.pending_count(),
        dispatch: state.dispatcher.as_ref().map(|d| d.stats()),
    })
}
