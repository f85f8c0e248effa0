//! Typed notifications published by a session.

use super::state::ConnectionState;
use crate::error::FlightClientError;

/// Broadcast to every [`Session::subscribe`](super::Session::subscribe) receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The lifecycle state changed
    StateChanged(ConnectionState),
    /// A log packet was recorded
    SampleReceived { group: String, timestamp: u64 },
    /// A log group failed to start, or the vehicle reported an error for it
    GroupError { group: String, message: String },
    /// Parameter writes after link-up failed; the session will not become ready
    ConfigurationFailed(String),
}

/// A log group that could not be activated.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFailure {
    pub group: String,
    pub variables: Vec<String>,
    pub reason: String,
}

/// Why a session stopped short of, or fell out of, `FullyConfigured`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFault {
    ConnectionFailed(String),
    ConnectionLost(String),
    Configuration(String),
}

impl SessionFault {
    pub fn to_error(&self, uri: &str) -> FlightClientError {
        match self {
            SessionFault::ConnectionFailed(message) => FlightClientError::ConnectionFailed {
                uri: uri.to_string(),
                message: message.clone(),
            },
            SessionFault::ConnectionLost(message) => FlightClientError::ConnectionLost {
                uri: uri.to_string(),
                message: message.clone(),
            },
            SessionFault::Configuration(message) => {
                FlightClientError::ConfigurationFailed(message.clone())
            }
        }
    }
}
