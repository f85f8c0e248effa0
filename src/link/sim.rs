//! # Simulated Vehicle Link
//!
//! An in-process stand-in for the radio transport, used for dry runs and
//! tests. It follows the same event sequence as a real vehicle:
//!
//! 1. `open` returns immediately, then `Connected` and `FullyConnected`
//!    are emitted after a short delay
//! 2. Log groups are checked against the vehicle's log table on
//!    registration; unknown variables are rejected
//! 3. Started groups stream `LogData` at their period, with position-like
//!    variables tracking the last position setpoint
//!
//! The simulated vehicle tracks setpoints perfectly; it is a plumbing
//! check, not a flight model.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant};
use tracing::{debug, info, warn};

use super::{EventSender, LinkEvent, VehicleLink};
use crate::error::{FlightClientError, Result};
use crate::telemetry::packer::LogGroup;
use crate::telemetry::variable::default_variables;

/// Delay between `open` and each link-up event.
const LINK_UP_DELAY_MS: u64 = 20;

/// Largest log packet payload the simulated vehicle accepts.
pub const SIM_MAX_PAYLOAD_BYTES: usize = 26;

/// Motor command reported while a position setpoint is active.
const HOVER_MOTOR_COMMAND: f64 = 40000.0;

/// Parameters the simulated vehicle exposes.
const PARAMS: &[&str] = &[
    "kalman.resetEstimation",
    "ae483par.reset_observer",
    "ae483par.use_observer",
    "stabilizer.controller",
    "powerDist.motorSetEnable",
];

/// Log variables present on the vehicle but not in the default subscription.
const EXTRA_LOG_VARIABLES: &[&str] = &[
    "ae483log.num_tof",
    "ae483log.num_flow",
    "ae483log.tau_x",
    "ae483log.tau_y",
    "ae483log.tau_z",
    "ae483log.f_z",
];

#[derive(Debug, Default)]
struct SimState {
    events: Option<EventSender>,
    opened_at: Option<Instant>,
    params: HashMap<String, f64>,
    setpoint: Option<[f64; 4]>,
    groups: HashMap<String, LogGroup>,
    streams: HashMap<String, JoinHandle<()>>,
}

impl SimState {
    fn emit(&self, event: LinkEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("Simulated link event dropped, receiver gone");
            }
        }
    }

    fn stop_streams(&mut self) {
        for (name, handle) in self.streams.drain() {
            debug!("Stopping simulated stream {}", name);
            handle.abort();
        }
    }
}

/// Simulated vehicle implementing [`VehicleLink`].
#[derive(Clone)]
pub struct SimLink {
    state: Arc<Mutex<SimState>>,
    log_table: Arc<HashSet<String>>,
    fail_open: Option<String>,
}

impl std::fmt::Debug for SimLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimLink")
            .field("log_table", &self.log_table.len())
            .finish_non_exhaustive()
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimLink {
    /// Simulated vehicle carrying the standard log table.
    pub fn new() -> Self {
        let table = default_variables()
            .into_iter()
            .map(|v| v.name)
            .chain(EXTRA_LOG_VARIABLES.iter().map(|s| s.to_string()))
            .collect();
        Self::with_log_table(table)
    }

    /// Simulated vehicle exposing exactly `table` as loggable variables.
    pub fn with_log_table(table: HashSet<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            log_table: Arc::new(table),
            fail_open: None,
        }
    }

    /// Make every `open` end in `ConnectionFailed(message)`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_open = Some(message.into());
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last value written to `name`.
    pub fn param(&self, name: &str) -> Option<f64> {
        self.state().params.get(name).copied()
    }

    /// Last position setpoint, `None` after a stop.
    pub fn setpoint(&self) -> Option<[f64; 4]> {
        self.state().setpoint
    }

    /// Names of groups currently streaming.
    pub fn streaming_groups(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().streams.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop the radio link as if the vehicle went out of range.
    pub fn lose_link(&self, message: &str) {
        let mut state = self.state();
        state.stop_streams();
        state.emit(LinkEvent::ConnectionLost(message.to_string()));
        state.emit(LinkEvent::Disconnected);
        state.events = None;
    }

    fn require_open(&self) -> Result<()> {
        if self.state().events.is_none() {
            return Err(FlightClientError::Transmission("link is not open".to_string()));
        }
        Ok(())
    }
}

/// Value the simulated vehicle reports for `name` given the current setpoint.
fn simulated_value(name: &str, setpoint: Option<[f64; 4]>) -> f64 {
    let Some([x, y, z, yaw]) = setpoint else {
        return 0.0;
    };
    let field = name.rsplit('.').next().unwrap_or(name);
    match field {
        "x" | "o_x" | "o_x_des" => x,
        "y" | "o_y" | "o_y_des" => y,
        "z" | "o_z" | "o_z_des" | "r" => z,
        "yaw" | "psi" => yaw,
        "m_1" | "m_2" | "m_3" | "m_4" => HOVER_MOTOR_COMMAND,
        _ => 0.0,
    }
}

fn spawn_stream(state: Arc<Mutex<SimState>>, group: LogGroup) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(group.period_ms.max(1)));
        loop {
            ticker.tick().await;
            let guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            let timestamp = guard
                .opened_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or_default();
            let values = group
                .variables
                .iter()
                .map(|v| (v.name.clone(), simulated_value(&v.name, guard.setpoint)))
                .collect();
            guard.emit(LinkEvent::LogData {
                group: group.name.clone(),
                timestamp,
                values,
            });
        }
    })
}

#[async_trait]
impl VehicleLink for SimLink {
    async fn open(&self, uri: &str, events: EventSender) -> Result<()> {
        info!("Opening simulated link to {}", uri);
        {
            let mut state = self.state();
            state.events = Some(events);
            state.opened_at = Some(Instant::now());
        }

        let sequence = match self.fail_open.clone() {
            Some(message) => vec![LinkEvent::ConnectionFailed(message)],
            None => vec![LinkEvent::Connected, LinkEvent::FullyConnected],
        };
        let state = self.state.clone();
        let uri = uri.to_string();
        tokio::spawn(async move {
            for event in sequence {
                sleep(Duration::from_millis(LINK_UP_DELAY_MS)).await;
                debug!("Simulated link {} -> {}", uri, event.kind());
                // Closed or lost in the meantime: the sender is gone
                state.lock().unwrap_or_else(PoisonError::into_inner).emit(event);
            }
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state();
        state.stop_streams();
        state.groups.clear();
        state.emit(LinkEvent::Disconnected);
        state.events = None;
        Ok(())
    }

    async fn set_param(&self, name: &str, value: f64) -> Result<()> {
        self.require_open()?;
        if !PARAMS.contains(&name) {
            return Err(FlightClientError::Parameter {
                name: name.to_string(),
                reason: "not in vehicle parameter table".to_string(),
            });
        }
        debug!("Simulated param {} = {}", name, value);
        self.state().params.insert(name.to_string(), value);
        Ok(())
    }

    async fn send_position_setpoint(&self, x: f64, y: f64, z: f64, yaw: f64) -> Result<()> {
        self.require_open()?;
        self.state().setpoint = Some([x, y, z, yaw]);
        Ok(())
    }

    async fn send_stop_setpoint(&self) -> Result<()> {
        self.require_open()?;
        self.state().setpoint = None;
        Ok(())
    }

    async fn add_log_group(&self, group: &LogGroup) -> Result<()> {
        self.require_open()?;
        if let Some(missing) = group
            .variables
            .iter()
            .find(|v| !self.log_table.contains(&v.name))
        {
            return Err(FlightClientError::LogGroup {
                group: group.name.clone(),
                reason: format!("variable {} not found in vehicle log table", missing.name),
            });
        }
        if group.payload_bytes() > SIM_MAX_PAYLOAD_BYTES {
            return Err(FlightClientError::LogGroup {
                group: group.name.clone(),
                reason: format!(
                    "payload of {} bytes exceeds {} byte packet",
                    group.payload_bytes(),
                    SIM_MAX_PAYLOAD_BYTES
                ),
            });
        }
        if group.variables.is_empty() || group.period_ms == 0 {
            return Err(FlightClientError::LogGroup {
                group: group.name.clone(),
                reason: "bad configuration".to_string(),
            });
        }
        self.state().groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn start_log_group(&self, name: &str) -> Result<()> {
        self.require_open()?;
        let mut state = self.state();
        let Some(group) = state.groups.get(name).cloned() else {
            return Err(FlightClientError::LogGroup {
                group: name.to_string(),
                reason: "not registered".to_string(),
            });
        };
        if state.streams.contains_key(name) {
            warn!("Simulated group {} already streaming", name);
            return Ok(());
        }
        let handle = spawn_stream(self.state.clone(), group);
        state.streams.insert(name.to_string(), handle);
        Ok(())
    }

    async fn stop_log_group(&self, name: &str) -> Result<()> {
        if let Some(handle) = self.state().streams.remove(name) {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::event_channel;
    use crate::telemetry::variable::TelemetryVariable;

    fn group(name: &str, vars: &[&str]) -> LogGroup {
        LogGroup {
            name: name.to_string(),
            period_ms: 10,
            variables: vars.iter().map(|v| TelemetryVariable::float(*v)).collect(),
            oversized: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_emits_link_up_sequence() {
        let link = SimLink::new();
        let (tx, mut rx) = event_channel();
        link.open("radio://sim", tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));
        assert_eq!(rx.recv().await, Some(LinkEvent::FullyConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_open_emits_connection_failed() {
        let link = SimLink::new().failing("no radio");
        let (tx, mut rx) = event_channel();
        link.open("radio://sim", tx).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::ConnectionFailed("no radio".to_string()))
        );
    }

    #[tokio::test]
    async fn test_requests_rejected_before_open() {
        let link = SimLink::new();
        assert!(link.set_param("stabilizer.controller", 4.0).await.is_err());
        assert!(link.send_stop_setpoint().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_param_and_variable_rejected() {
        let link = SimLink::new();
        let (tx, _rx) = event_channel();
        link.open("radio://sim", tx).await.unwrap();

        assert!(link.set_param("no.such", 1.0).await.is_err());
        assert!(link.set_param("stabilizer.controller", 4.0).await.is_ok());
        assert_eq!(link.param("stabilizer.controller"), Some(4.0));

        let err = link
            .add_log_group(&group("LogConf0", &["stateEstimate.x", "bogus.var"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bogus.var"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_group_rejected() {
        let link = SimLink::new();
        let (tx, _rx) = event_channel();
        link.open("radio://sim", tx).await.unwrap();

        let names: Vec<String> = default_variables().into_iter().take(7).map(|v| v.name).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        assert!(link.add_log_group(&group("LogConf0", &refs)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_tracks_setpoint() {
        let link = SimLink::new();
        let (tx, mut rx) = event_channel();
        link.open("radio://sim", tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));
        assert_eq!(rx.recv().await, Some(LinkEvent::FullyConnected));

        link.add_log_group(&group("LogConf0", &["stateEstimate.x", "stateEstimate.z"]))
            .await
            .unwrap();
        link.send_position_setpoint(0.5, 0.0, 0.35, 0.0).await.unwrap();
        link.start_log_group("LogConf0").await.unwrap();
        assert_eq!(link.streaming_groups(), vec!["LogConf0".to_string()]);

        match rx.recv().await {
            Some(LinkEvent::LogData { group, values, .. }) => {
                assert_eq!(group, "LogConf0");
                assert_eq!(values["stateEstimate.x"], 0.5);
                assert_eq!(values["stateEstimate.z"], 0.35);
            }
            other => panic!("Expected LogData, got {:?}", other),
        }

        link.stop_log_group("LogConf0").await.unwrap();
        assert!(link.streaming_groups().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lose_link_emits_lost_then_disconnected() {
        let link = SimLink::new();
        let (tx, mut rx) = event_channel();
        link.open("radio://sim", tx).await.unwrap();
        link.lose_link("range");

        assert_eq!(rx.recv().await, Some(LinkEvent::ConnectionLost("range".to_string())));
        assert_eq!(rx.recv().await, Some(LinkEvent::Disconnected));
        assert!(link.send_stop_setpoint().await.is_err());
    }

    #[test]
    fn test_simulated_values() {
        let sp = Some([1.0, 2.0, 3.0, 45.0]);
        assert_eq!(simulated_value("stateEstimate.x", sp), 1.0);
        assert_eq!(simulated_value("ae483log.o_y_des", sp), 2.0);
        assert_eq!(simulated_value("ae483log.r", sp), 3.0);
        assert_eq!(simulated_value("stateEstimate.yaw", sp), 45.0);
        assert_eq!(simulated_value("ae483log.m_1", sp), HOVER_MOTOR_COMMAND);
        assert_eq!(simulated_value("ae483log.m_1", None), 0.0);
        assert_eq!(simulated_value("ae483log.w_x", sp), 0.0);
    }
}
