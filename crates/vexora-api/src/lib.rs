//! HTTP API for the Vexora device backend.
//!
//! Exposes command sending with acknowledgement wait, the device registry
//! and a health endpoint.

pub mod handlers;
pub mod models;
pub mod server;

pub use models::{
    DeviceDetailResponse, DeviceResponse, ErrorResponse, SendCommandRequest, SendCommandResponse,
};
pub use server::{create_router, run, ServerState};
