//! Control channel between the UI process and the receiver core

pub mod channel;
pub mod controller;
pub mod host;

pub use channel::{ControlReader, EventWriter};
pub use controller::Controller;
pub use host::host_info;
