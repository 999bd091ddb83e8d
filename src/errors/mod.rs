pub mod app_error;
pub mod bridge_error;

pub use app_error::{AppError, AppResult};
pub use bridge_error::{BridgeError, BridgeResult};
