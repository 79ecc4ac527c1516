//! Error types for the DLB4 USB backend

use thiserror::Error;

/// Result type for USB backend operations
pub type Result<T> = std::result::Result<T, UsbError>;

/// Errors that can occur while finding and opening the board
#[derive(Debug, Error)]
pub enum UsbError {
    /// No matching board attached
    #[error("ITE DLB4 download board not found (VID:048d PID:8390)")]
    DeviceNotFound,

    /// Failed to enumerate or open the device
    #[error("Failed to open DLB4: {0}")]
    OpenFailed(String),

    /// Failed to claim the interface or its endpoints
    #[error("Failed to claim interface: {0}")]
    ClaimFailed(String),

    /// Bad programmer option
    #[error("Configuration error: {0}")]
    ConfigError(String),
}
