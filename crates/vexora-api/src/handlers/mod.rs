//! API handlers organized by domain.

pub mod basic;
pub mod commands;
pub mod devices;

pub use crate::server::ServerState;

pub use basic::health_handler;
pub use commands::send_command_handler;
pub use devices::{get_device_handler, list_devices_handler};
