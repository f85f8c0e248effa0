//! Link event delivery.
//!
//! A single task drains the link event channel and is the only writer of
//! session state: lifecycle transitions, the active group table and the
//! telemetry recorder all change here, under the session mutex. Callers on
//! the flight-control side only read snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::configure::{apply_control, subscribe};
use super::events::{GroupFailure, SessionEvent, SessionFault};
use super::state::{ConnectionState, StateMachine, Transition};
use crate::config::Config;
use crate::link::{EventReceiver, LinkEvent, VehicleLink};
use crate::telemetry::packer::{pack, LogGroup};
use crate::telemetry::recorder::TelemetryRecorder;

/// State shared between the event task and the session facade.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub machine: StateMachine,
    pub recorder: TelemetryRecorder,
    pub groups: Vec<LogGroup>,
    pub group_index: HashMap<String, usize>,
    pub failures: Vec<GroupFailure>,
    /// Set by `Session::close`; configuration still in flight must not
    /// leave groups streaming.
    pub closing: bool,
}

pub(crate) fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct EventPump {
    pub uri: String,
    pub config: Config,
    pub link: Arc<dyn VehicleLink>,
    pub shared: Arc<Mutex<Shared>>,
    pub state_tx: watch::Sender<ConnectionState>,
    pub fault_tx: watch::Sender<Option<SessionFault>>,
    pub events_tx: broadcast::Sender<SessionEvent>,
}

impl EventPump {
    /// Process events until every sender is gone.
    pub async fn run(self, mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        debug!("Link event channel for {} closed", self.uri);
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Apply `transition` with the lock held, then notify watchers.
    fn transition(&self, shared: &mut Shared, transition: Transition) -> bool {
        let before = shared.machine.state();
        match shared.machine.apply(transition) {
            Ok(after) if after != before => {
                debug!("{:?} -> {:?}", before, after);
                self.state_tx.send_replace(after);
                self.publish(SessionEvent::StateChanged(after));
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Ignoring link event: {}", e);
                false
            }
        }
    }

    pub async fn handle(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                info!("Connected to {}", self.uri);
                self.transition(&mut lock(&self.shared), Transition::LinkEstablished);
            }
            LinkEvent::FullyConnected => {
                info!("Fully connected to {}", self.uri);
                self.configure().await;
            }
            LinkEvent::ConnectionFailed(message) => {
                error!("Connection to {} failed: {}", self.uri, message);
                let mut shared = lock(&self.shared);
                if shared.machine.state() == ConnectionState::Connecting {
                    self.fault_tx.send_replace(Some(SessionFault::ConnectionFailed(message)));
                }
                self.transition(&mut shared, Transition::LinkFailed);
            }
            LinkEvent::ConnectionLost(message) => {
                error!("Connection to {} lost: {}", self.uri, message);
                let mut shared = lock(&self.shared);
                if matches!(
                    shared.machine.state(),
                    ConnectionState::Connected | ConnectionState::FullyConfigured
                ) {
                    self.fault_tx.send_replace(Some(SessionFault::ConnectionLost(message)));
                }
                self.transition(&mut shared, Transition::LinkLost);
            }
            LinkEvent::Disconnected => {
                info!("Disconnected from {}", self.uri);
                self.transition(&mut lock(&self.shared), Transition::Close);
            }
            LinkEvent::LogData {
                group,
                timestamp,
                values,
            } => self.record(group, timestamp, values),
            LinkEvent::LogError { group, message } => {
                warn!("Error when logging {}: {}", group, message);
                self.publish(SessionEvent::GroupError { group, message });
            }
        }
    }

    fn record(&self, group: String, timestamp: u64, values: HashMap<String, f64>) {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        let Some(&idx) = shared.group_index.get(&group) else {
            debug!("Dropping data for inactive group {}", group);
            return;
        };
        for var in &shared.groups[idx].variables {
            match values.get(&var.name) {
                Some(&value) => shared.recorder.record(&var.name, timestamp, value),
                None => warn!("{} packet at {} has no value for {}", group, timestamp, var.name),
            }
        }
        drop(guard);
        self.publish(SessionEvent::SampleReceived { group, timestamp });
    }

    /// Entry actions of `FullyConfigured`. The lock is not held while the
    /// link is busy; later events queue in the channel meanwhile.
    async fn configure(&self) {
        let (state, closing) = {
            let shared = lock(&self.shared);
            (shared.machine.state(), shared.closing)
        };
        if state != ConnectionState::Connected {
            warn!("Ignoring fully-connected event in state {:?}", state);
            return;
        }
        if closing {
            info!("Session closing, skipping configuration of {}", self.uri);
            return;
        }

        if let Err(e) = apply_control(self.link.as_ref(), &self.config.control).await {
            error!("Could not configure vehicle: {}", e);
            let message = e.to_string();
            self.fault_tx
                .send_replace(Some(SessionFault::Configuration(message.clone())));
            self.publish(SessionEvent::ConfigurationFailed(message));
            return;
        }

        let telemetry = &self.config.telemetry;
        let groups = pack(&telemetry.variables, telemetry.packing_bound(), telemetry.period_ms);
        let sub = subscribe(self.link.as_ref(), groups).await;

        for failure in &sub.failures {
            self.publish(SessionEvent::GroupError {
                group: failure.group.clone(),
                message: failure.reason.clone(),
            });
        }

        if lock(&self.shared).closing {
            // Close ran while groups were being started and saw none of them
            for group in &sub.active {
                if let Err(e) = self.link.stop_log_group(&group.name).await {
                    warn!("Could not stop {}: {}", group.name, e);
                }
            }
            return;
        }

        let mut shared = lock(&self.shared);
        for var in &telemetry.variables {
            shared.recorder.declare(&var.name);
        }
        for group in sub.active {
            let idx = shared.groups.len();
            shared.group_index.insert(group.name.clone(), idx);
            shared.groups.push(group);
        }
        shared.failures.extend(sub.failures);
        self.transition(&mut shared, Transition::Configured);
    }
}
