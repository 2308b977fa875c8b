//! Core error types for locshare-core.
//!
//! Errors are grouped by the component that raises them. The tracking
//! coordinator only ever sees [`TrackingError`]; transport and storage
//! failures are converted into it at the component boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::tracking::TrackingMode;

/// Core error type for locshare-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Tracking-related errors
    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    /// Realtime transport errors
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Session store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Failures surfaced by the tracking subsystem.
#[derive(Error, Debug)]
pub enum TrackingError {
    /// The platform refused location access for the requested mode.
    #[error("Location permission denied for {mode} tracking")]
    PermissionDenied { mode: TrackingMode },

    /// The realtime connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A request/response round-trip exceeded its deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The durable channel rejected or failed to store a sample.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A realtime broadcast was dropped.
    #[error("Broadcast failure: {0}")]
    Broadcast(String),

    /// The platform could not produce a position.
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    /// Session descriptor persistence failed.
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the realtime pub/sub transport.
#[derive(Error, Debug, Clone)]
pub enum RealtimeError {
    /// Connection could not be opened, or was torn down while waiting.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No reply arrived before the deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The broker sent something the client could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A payload could not be encoded or decoded.
    #[error("Payload error: {0}")]
    Payload(String),
}

/// Session store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the backing database
    #[error("Failed to open session store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(#[from] rusqlite::Error),

    /// Stored descriptor could not be (de)serialized
    #[error("Corrupt session descriptor: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Data directory could not be resolved
    #[error("Data directory unavailable: {0}")]
    DataDir(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<RealtimeError> for TrackingError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::Timeout { timeout_ms } => TrackingError::Timeout { timeout_ms },
            RealtimeError::Connection(msg) => TrackingError::Connection(msg),
            other => TrackingError::Broadcast(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Payload(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
