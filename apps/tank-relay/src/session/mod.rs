//! Per-connection session tasks. Each accepted socket gets one task running
//! one of these handlers until the peer goes away.

mod controller;
mod device;

pub use controller::{handle_controller_frame, run_controller_session};
pub use device::run_device_session;
