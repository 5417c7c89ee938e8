//! Device command handler.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use vexora_devices::CommandError;

use super::ServerState;
use crate::models::{ApiResult, ErrorResponse, SendCommandRequest, SendCommandResponse};

/// Send a command and wait for the device acknowledgement.
///
/// POST /api/v1/dev/:device_id/cmd
///
/// A timeout answers 504 with the synthetic acknowledgement in the body. If
/// the client goes away the handler future is dropped, which releases the
/// pending command.
pub async fn send_command_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<String>,
    Json(req): Json<SendCommandRequest>,
) -> ApiResult<(StatusCode, Json<SendCommandResponse>)> {
    let timeout = match req.timeout_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
        _ => Duration::ZERO,
    };

    match state
        .commands
        .send(&device_id, &req.command_type, req.params, timeout)
        .await
    {
        Ok(ack) => Ok((StatusCode::OK, Json(SendCommandResponse { ack }))),
        Err(CommandError::Timeout { ack, .. }) => Ok((
            StatusCode::GATEWAY_TIMEOUT,
            Json(SendCommandResponse { ack: *ack }),
        )),
        Err(e) => {
            tracing::warn!(
                device_id = %device_id,
                command_type = %req.command_type,
                error = %e,
                "command send failed"
            );
            Err(ErrorResponse::from(e))
        }
    }
}
