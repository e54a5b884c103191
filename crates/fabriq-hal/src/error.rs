//! Error types for HAL operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for HAL operations
pub type Result<T> = std::result::Result<T, HalError>;

/// Errors that can occur during HAL operations
///
/// The enum is `Clone` so an execution stream can keep a snapshot of the
/// most recent failure without consuming it. I/O errors are therefore
/// captured as messages rather than as `std::io::Error` sources.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Device node not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Invalid argument passed to a HAL call
    #[error("Invalid parameter: {reason}")]
    InvalidParameter {
        /// What was wrong with the argument
        reason: String,
    },

    /// Register access failed
    #[error("Register I/O error at {addr:#x}: {reason}")]
    RegisterIo {
        /// Register address that was accessed
        addr: u64,
        /// Reason for failure
        reason: String,
    },

    /// Data transfer failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Platform or stream configuration is unusable
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Reason for failure
        reason: String,
    },

    /// Requested capability is not implemented
    #[error("Not implemented: {feature}")]
    NotImplemented {
        /// Feature that was requested
        feature: String,
    },

    /// A deferred or direct operation failed during execution
    #[error("Operation failed: {reason}")]
    OperationFailed {
        /// Reason for failure
        reason: String,
    },

    /// Operation timeout
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// I/O error during device communication
    #[error("I/O error: {message}")]
    Io {
        /// Description of the underlying I/O error
        message: String,
    },
}

impl HalError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Create a register I/O error
    pub fn register_io(addr: u64, reason: impl Into<String>) -> Self {
        Self::RegisterIo {
            addr,
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a not implemented error
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    /// Create an operation failed error
    pub fn operation_failed(reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for HalError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<rustix::io::Errno> for HalError {
    fn from(err: rustix::io::Errno) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}
