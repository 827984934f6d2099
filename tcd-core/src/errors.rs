//! Error taxonomy for the transcoder engine.

use thiserror::Error;

/// Top-level error type for all `tcd-core` operations.
#[derive(Debug, Error)]
pub enum TcdError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),
}

/// Configuration-time errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no module letters found in '{raw}'")]
    EmptyModuleList { raw: String },

    #[error("too many transcoded modules ({count}) for a device with {capacity} channel(s)")]
    TooManyModules { count: usize, capacity: usize },

    #[error("'{0}' is not a valid IPv4 or IPv6 address")]
    MalformedAddress(String),

    #[error("port {0} must be in (1024, 49000)")]
    PortOutOfRange(u32),

    #[error("unknown configuration key: '{0}'")]
    UnknownKey(String),

    #[error("line '{0}' has no '=' separator")]
    MissingSeparator(String),

    #[error("missing key or value in line '{0}'")]
    MissingKeyOrValue(String),

    #[error("'{path}' could not be opened: {reason}")]
    FileNotFound { path: String, reason: String },
}

/// Device discovery, initialization, and runtime I/O errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no FTDI devices were found")]
    NoDevicesFound,

    #[error("expected exactly two DVSI devices, found {found}")]
    WrongDeviceCount { found: usize },

    #[error("{description}: {operation} failed: {reason}")]
    Io {
        description: String,
        operation: &'static str,
        reason: String,
    },

    #[error("{description}: initialization acknowledgement mismatch during {step}")]
    InitAckMismatch {
        description: String,
        step: &'static str,
    },

    #[error("{description}: malformed response packet during {operation}")]
    MalformedResponse {
        description: String,
        operation: &'static str,
    },

    #[error("frame queue exceeded the safety cap of {cap} entries; terminating")]
    QueueOverflow { cap: usize },
}

/// Router / socket-plumbing errors.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to bind reflector ingress socket at '{path}': {reason}")]
    BindFailed { path: String, reason: String },

    #[error("failed to send completed frame to module '{module}' at '{path}': {reason}")]
    SendFailed {
        module: char,
        path: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, TcdError>;
