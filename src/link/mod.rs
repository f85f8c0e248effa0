//! # Vehicle Link Module
//!
//! The seam between the session manager and the radio transport.
//!
//! The transport is consumed as an opaque request/response interface
//! ([`VehicleLink`]) plus a stream of typed [`LinkEvent`]s. Events are
//! pushed by the transport on its own tasks through the [`EventSender`]
//! handed to it in [`VehicleLink::open`]; the session consumes them from a
//! single receiver, so every state change is applied in arrival order.

pub mod sim;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::telemetry::packer::LogGroup;

pub use sim::SimLink;

/// Events delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Radio link is up
    Connected,
    /// Link is up and the vehicle's parameter and log tables are downloaded
    FullyConnected,
    /// Opening the link failed
    ConnectionFailed(String),
    /// An established link dropped
    ConnectionLost(String),
    /// Link closed
    Disconnected,
    /// One packet of a started log group
    LogData {
        group: String,
        timestamp: u64,
        values: HashMap<String, f64>,
    },
    /// The vehicle reported a problem with a log group
    LogError { group: String, message: String },
}

impl LinkEvent {
    /// Short event name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkEvent::Connected => "connected",
            LinkEvent::FullyConnected => "fully-connected",
            LinkEvent::ConnectionFailed(_) => "connection-failed",
            LinkEvent::ConnectionLost(_) => "connection-lost",
            LinkEvent::Disconnected => "disconnected",
            LinkEvent::LogData { .. } => "log-data",
            LinkEvent::LogError { .. } => "log-error",
        }
    }
}

/// Sending half handed to the transport.
pub type EventSender = mpsc::UnboundedSender<LinkEvent>;

/// Receiving half consumed by the session.
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Create a link event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Transport interface to one vehicle.
///
/// Methods take `&self`: implementations are shared between the session's
/// event task and the flight-control caller and synchronize internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VehicleLink: Send + Sync {
    /// Start opening the link. Must not wait for the link to come up;
    /// progress is reported through `events`.
    async fn open(&self, uri: &str, events: EventSender) -> Result<()>;

    /// Release the link.
    async fn close(&self) -> Result<()>;

    /// Write a vehicle parameter such as `kalman.resetEstimation`.
    async fn set_param(&self, name: &str, value: f64) -> Result<()>;

    /// Send an absolute position setpoint (meters, yaw in degrees).
    async fn send_position_setpoint(&self, x: f64, y: f64, z: f64, yaw: f64) -> Result<()>;

    /// Send the zero-actuation stop setpoint.
    async fn send_stop_setpoint(&self) -> Result<()>;

    /// Register a log group with the vehicle.
    async fn add_log_group(&self, group: &LogGroup) -> Result<()>;

    /// Start streaming a registered log group.
    async fn start_log_group(&self, name: &str) -> Result<()>;

    /// Stop streaming a log group.
    async fn stop_log_group(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::FlightClientError;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Everything the session asked the transport to do.
    #[derive(Debug, Clone, PartialEq)]
    pub enum LinkCall {
        Open(String),
        Close,
        SetParam(String, f64),
        Position(f64, f64, f64, f64),
        Stop,
        AddGroup(String),
        StartGroup(String),
        StopGroup(String),
    }

    /// Recording transport for tests.
    ///
    /// Events are not produced on its own; tests push them through
    /// [`RecordingLink::emit`] once `open` has captured the sender.
    #[derive(Clone, Default)]
    pub struct RecordingLink {
        pub calls: Arc<Mutex<Vec<LinkCall>>>,
        pub events: Arc<Mutex<Option<EventSender>>>,
        pub rejected_variables: Arc<Mutex<HashSet<String>>>,
        pub param_error: Arc<Mutex<Option<String>>>,
        pub send_error_after: Arc<Mutex<Option<usize>>>,
        pub start_gate: Arc<Mutex<Option<Arc<tokio::sync::Semaphore>>>>,
    }

    impl RecordingLink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<LinkCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn positions(&self) -> Vec<(f64, f64, f64, f64)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    LinkCall::Position(x, y, z, yaw) => Some((x, y, z, yaw)),
                    _ => None,
                })
                .collect()
        }

        pub fn params(&self) -> Vec<(String, f64)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    LinkCall::SetParam(name, value) => Some((name, value)),
                    _ => None,
                })
                .collect()
        }

        /// Reject any group containing `name` in `add_log_group`.
        pub fn reject_variable(&self, name: &str) {
            self.rejected_variables.lock().unwrap().insert(name.to_string());
        }

        /// Fail every `set_param` with `reason`.
        pub fn fail_params(&self, reason: &str) {
            *self.param_error.lock().unwrap() = Some(reason.to_string());
        }

        /// Let `n` setpoints through, then fail every further one.
        pub fn fail_setpoints_after(&self, n: usize) {
            *self.send_error_after.lock().unwrap() = Some(n);
        }

        /// Block every `start_log_group` until a permit is added to the
        /// returned semaphore. The call is recorded before blocking.
        pub fn gate_group_starts(&self) -> Arc<tokio::sync::Semaphore> {
            let gate = Arc::new(tokio::sync::Semaphore::new(0));
            *self.start_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        /// Push an event as if the transport produced it.
        pub fn emit(&self, event: LinkEvent) {
            if let Some(tx) = self.events.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }

        fn push(&self, call: LinkCall) {
            self.calls.lock().unwrap().push(call);
        }

        fn check_send(&self) -> Result<()> {
            let sent = self
                .calls()
                .iter()
                .filter(|c| matches!(c, LinkCall::Position(..) | LinkCall::Stop))
                .count();
            match *self.send_error_after.lock().unwrap() {
                Some(limit) if sent >= limit => {
                    Err(FlightClientError::Transmission("Mock radio timeout".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl VehicleLink for RecordingLink {
        async fn open(&self, uri: &str, events: EventSender) -> Result<()> {
            *self.events.lock().unwrap() = Some(events);
            self.push(LinkCall::Open(uri.to_string()));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.push(LinkCall::Close);
            Ok(())
        }

        async fn set_param(&self, name: &str, value: f64) -> Result<()> {
            if let Some(reason) = self.param_error.lock().unwrap().clone() {
                return Err(FlightClientError::Parameter {
                    name: name.to_string(),
                    reason,
                });
            }
            self.push(LinkCall::SetParam(name.to_string(), value));
            Ok(())
        }

        async fn send_position_setpoint(&self, x: f64, y: f64, z: f64, yaw: f64) -> Result<()> {
            self.check_send()?;
            self.push(LinkCall::Position(x, y, z, yaw));
            Ok(())
        }

        async fn send_stop_setpoint(&self) -> Result<()> {
            self.check_send()?;
            self.push(LinkCall::Stop);
            Ok(())
        }

        async fn add_log_group(&self, group: &LogGroup) -> Result<()> {
            let rejected = self.rejected_variables.lock().unwrap().clone();
            if let Some(var) = group.variables.iter().find(|v| rejected.contains(&v.name)) {
                return Err(FlightClientError::LogGroup {
                    group: group.name.clone(),
                    reason: format!("variable {} not found in vehicle log table", var.name),
                });
            }
            self.push(LinkCall::AddGroup(group.name.clone()));
            Ok(())
        }

        async fn start_log_group(&self, name: &str) -> Result<()> {
            self.push(LinkCall::StartGroup(name.to_string()));
            let gate = self.start_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            Ok(())
        }

        async fn stop_log_group(&self, name: &str) -> Result<()> {
            self.push(LinkCall::StopGroup(name.to_string()));
            Ok(())
        }
    }
}
