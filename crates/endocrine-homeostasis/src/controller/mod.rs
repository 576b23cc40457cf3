//! Homeostasis controller and its background tasks

pub mod homeostasis;
pub mod tasks;

pub use homeostasis::{ControlState, ControllerStatus, HomeostasisController, MonitorReport};
pub use tasks::ControllerHandle;
