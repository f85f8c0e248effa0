//! # Error Types
//!
//! Custom error types for the flight client using `thiserror`.

use thiserror::Error;

use crate::session::state::ConnectionState;

/// Main error type for the flight client
#[derive(Debug, Error)]
pub enum FlightClientError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Telemetry export/import errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The link to the vehicle could not be established
    #[error("Connection to {uri} failed: {message}")]
    ConnectionFailed { uri: String, message: String },

    /// The link to the vehicle dropped after it was established
    #[error("Connection to {uri} lost: {message}")]
    ConnectionLost { uri: String, message: String },

    /// A lifecycle event arrived in a state that does not accept it
    #[error("Invalid transition from {from:?} on {event}")]
    InvalidTransition { from: ConnectionState, event: String },

    /// Trajectory command issued outside the fully-configured state
    #[error("Session not ready (state: {0:?})")]
    NotReady(ConnectionState),

    /// Transport refused or failed to deliver a request
    #[error("Transmission failed: {0}")]
    Transmission(String),

    /// Vehicle parameters could not be written after link-up
    #[error("Vehicle configuration failed: {0}")]
    ConfigurationFailed(String),

    /// Log group could not be registered or started
    #[error("Log group {group} rejected: {reason}")]
    LogGroup { group: String, reason: String },

    /// Parameter write failed while configuring the vehicle
    #[error("Failed to set parameter {name}: {reason}")]
    Parameter { name: String, reason: String },

    /// Caller supplied a value the operation cannot use
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Readiness was not reached in time
    #[error("Timed out after {0} ms waiting for the session to become ready")]
    Timeout(u64),

    /// The running flight primitive was cancelled
    #[error("Flight cancelled")]
    Cancelled,
}

/// Result type alias for the flight client
pub type Result<T> = std::result::Result<T, FlightClientError>;
