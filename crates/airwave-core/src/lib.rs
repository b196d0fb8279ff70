//! Airwave Core Library
//!
//! Domain models, the media lifecycle state machine, the authoritative format
//! allow-list, error types and configuration shared by every airwave crate.

pub mod config;
pub mod error;
pub mod formats;
pub mod models;
pub mod task_error;

// Re-export commonly used types
pub use config::{AirwaveConfig, Config};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use formats::ContainerFormat;
pub use task_error::{TaskError, TaskResultExt};
