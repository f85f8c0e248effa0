//! # Connection State Machine
//!
//! Pure lifecycle transitions for one vehicle session.
//!
//! ```text
//! Idle --open--> Connecting --link up--> Connected --fully up--> FullyConfigured
//!                    |                       |                        |
//!                    +--failed--> Failed     +-------lost/closed------+--> Disconnected
//! ```
//!
//! `Failed` and `Disconnected` are terminal. The side effects of entering a
//! state (parameter writes, log subscriptions) live in the session; this
//! module only decides which transitions are legal.

use serde::Serialize;

use crate::error::{FlightClientError, Result};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    FullyConfigured,
    Disconnected,
    Failed,
}

impl ConnectionState {
    /// True only in `FullyConfigured`: the session accepts trajectory commands.
    pub fn is_ready(self) -> bool {
        self == ConnectionState::FullyConfigured
    }

    /// No further transitions leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// Inputs that drive the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Caller asked to open the link
    Open,
    /// Transport reports the link is up
    LinkEstablished,
    /// Transport reports the link is fully up and configuration succeeded
    Configured,
    /// Transport reports the open attempt failed
    LinkFailed,
    /// Transport reports an established link dropped
    LinkLost,
    /// Caller closed the link, or the transport reports it closed
    Close,
}

impl Transition {
    fn name(self) -> &'static str {
        match self {
            Transition::Open => "open",
            Transition::LinkEstablished => "link-established",
            Transition::Configured => "link-fully-established",
            Transition::LinkFailed => "link-error",
            Transition::LinkLost => "link-lost",
            Transition::Close => "close",
        }
    }
}

/// Compute the state after applying `transition` to `from`.
///
/// Closing an already-terminal session is a no-op rather than an error so
/// teardown is idempotent.
pub fn next_state(from: ConnectionState, transition: Transition) -> Result<ConnectionState> {
    use ConnectionState::*;

    let to = match (from, transition) {
        (Idle, Transition::Open) => Connecting,
        (Connecting, Transition::LinkEstablished) => Connected,
        (Connecting, Transition::LinkFailed) => Failed,
        (Connected, Transition::Configured) => FullyConfigured,
        (Connected | FullyConfigured, Transition::LinkLost) => Disconnected,
        (Failed, Transition::Close) => Failed,
        (_, Transition::Close) => Disconnected,
        (from, transition) => {
            return Err(FlightClientError::InvalidTransition {
                from,
                event: transition.name().to_string(),
            })
        }
    };
    Ok(to)
}

/// Current state plus the history needed to enforce ordering.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ConnectionState,
    history: Vec<ConnectionState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            history: vec![ConnectionState::Idle],
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[ConnectionState] {
        &self.history
    }

    /// Apply `transition`, returning the new state. On error the state is unchanged.
    pub fn apply(&mut self, transition: Transition) -> Result<ConnectionState> {
        let to = next_state(self.state, transition)?;
        if to != self.state {
            self.history.push(to);
            self.state = to;
        }
        Ok(to)
    }
}
