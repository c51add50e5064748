//! Error types shared across the merger

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the merger core
#[derive(Debug, Error)]
pub enum EngineError {
    /// Legacy calibration requests; correction is derived from the device only
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Worker error: {0}")]
    WorkerError(String),
}

/// Errors from the logical (merged) device
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to create logical device: {0}")]
    Create(#[source] std::io::Error),

    #[error("Failed to emit event: {0}")]
    Emit(#[source] std::io::Error),

    #[error("Logical device not registered")]
    NotRegistered,
}

/// Errors from the physical input host
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to open source stream: {0}")]
    Open(String),

    #[error("Failed to read device {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while loading or validating the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from the control socket
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to bind control socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Control connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control request not completed within {0:?}")]
    Timeout(std::time::Duration),
}
