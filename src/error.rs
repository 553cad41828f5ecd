//! Error types for the Zupiter gateway

use thiserror::Error;

/// Result type alias for Zupiter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Zupiter gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed inbound audio
    #[error("decode error: {0}")]
    Decode(String),

    /// Remote session could not be opened or sustained
    #[error("connection error: {0}")]
    Connection(String),

    /// A session is already open or opening on this engine
    #[error("a live session is already active")]
    AlreadyActive,

    /// No serial transport on this host, or no device to pick
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// User declined to pick a device
    #[error("device selection cancelled")]
    UserCancelled,

    /// `open` called before a device was requested
    #[error("no device requested")]
    NotRequested,

    /// Device refused the rate or is claimed elsewhere
    #[error("failed to open device: {0}")]
    OpenFailed(String),

    /// Text that is not one of the haptic control codes
    #[error("unknown haptic code: {0}")]
    UnknownCode(String),

    /// Actuator write failure
    #[error("write error: {0}")]
    Write(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
