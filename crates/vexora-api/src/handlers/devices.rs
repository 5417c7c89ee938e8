//! Device listing and detail.

use axum::{
    extract::{Path, State},
    Json,
};

use super::ServerState;
use crate::models::{ApiResult, DeviceDetailResponse, DeviceResponse, ErrorResponse};

/// GET /api/v1/devices
pub async fn list_devices_handler(State(state): State<ServerState>) -> Json<Vec<DeviceResponse>> {
    let devices = state.registry.list();
    Json(devices.iter().map(DeviceResponse::from).collect())
}

/// GET /api/v1/devices/:device_id
pub async fn get_device_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceDetailResponse>> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Err(ErrorResponse::bad_request("device id is required"));
    }

    let record = state
        .registry
        .get(device_id)
        .ok_or_else(|| ErrorResponse::not_found(format!("device '{device_id}' not found")))?;
    Ok(Json(DeviceDetailResponse::from(&record)))
}
