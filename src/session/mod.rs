//! # Session Module
//!
//! One connection to one vehicle, from link-up to export.
//!
//! [`Session`] is the object a flight script talks to. It owns the link
//! event task (see `pump`), the telemetry recorder fed by that task, and a
//! [`TrajectoryExecutor`] gated on the session being fully configured.
//!
//! ```no_run
//! use std::sync::Arc;
//! use flight_client::config::Config;
//! use flight_client::link::SimLink;
//! use flight_client::session::Session;
//! use flight_client::trajectory::Position;
//! use tokio::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> flight_client::error::Result<()> {
//!     let session = Session::open(Config::default(), Arc::new(SimLink::new())).await?;
//!     session.wait_until_ready().await?;
//!
//!     session.stop(Duration::from_secs(1)).await?;
//!     session.hold(Position::new(0.0, 0.0, 0.15), 0.0, Duration::from_secs(1)).await?;
//!     session.stop(Duration::from_secs(1)).await?;
//!
//!     session.close().await?;
//!     session.export("logged_data.json")
//! }
//! ```

pub mod configure;
pub mod events;
mod pump;
pub mod state;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FlightClientError, Result};
use crate::link::{event_channel, EventSender, LinkEvent, VehicleLink};
use crate::telemetry::packer::LogGroup;
use crate::telemetry::recorder::TelemetryRecorder;
use crate::trajectory::executor::TrajectoryExecutor;
use crate::trajectory::geometry::Position;
use crate::trajectory::plan::{FlightPlan, Step};

pub use events::{GroupFailure, SessionEvent, SessionFault};
pub use state::ConnectionState;

use pump::{lock, EventPump, Shared};

/// Buffered session events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 1024;

/// A live connection to one vehicle.
pub struct Session {
    uri: String,
    config: Config,
    link: Arc<dyn VehicleLink>,
    shared: Arc<Mutex<Shared>>,
    link_events: EventSender,
    state_rx: watch::Receiver<ConnectionState>,
    fault_rx: watch::Receiver<Option<SessionFault>>,
    events_tx: broadcast::Sender<SessionEvent>,
    executor: TrajectoryExecutor,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    opened_at: Instant,
    opened_wall: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uri", &self.uri)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start connecting to `config.link.uri` over `link`.
    ///
    /// Returns as soon as the transport accepted the open request; use
    /// [`wait_until_ready`](Self::wait_until_ready) before flying.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the transport refuses the open request
    /// outright. Failures reported later arrive as link events.
    pub async fn open(config: Config, link: Arc<dyn VehicleLink>) -> Result<Self> {
        let uri = config.link.uri.clone();
        let mut shared = Shared::default();
        shared.machine.apply(state::Transition::Open)?;
        let shared = Arc::new(Mutex::new(shared));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (fault_tx, fault_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (link_events, rx) = event_channel();
        let cancel = CancellationToken::new();

        let pump = EventPump {
            uri: uri.clone(),
            config: config.clone(),
            link: link.clone(),
            shared: shared.clone(),
            state_tx,
            fault_tx,
            events_tx: events_tx.clone(),
        };
        let pump = tokio::spawn(pump.run(rx));

        let executor = TrajectoryExecutor::new(
            link.clone(),
            state_rx.clone(),
            Duration::from_millis(config.trajectory.tick_interval_ms),
            cancel.clone(),
        );

        info!("Connecting to {}", uri);
        if let Err(e) = link.open(&uri, link_events.clone()).await {
            pump.abort();
            return Err(FlightClientError::ConnectionFailed {
                uri,
                message: e.to_string(),
            });
        }

        Ok(Self {
            uri,
            config,
            link,
            shared,
            link_events,
            state_rx,
            fault_rx,
            events_tx,
            executor,
            cancel,
            pump,
            opened_at: Instant::now(),
            opened_wall: Utc::now(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// True while the session accepts trajectory commands.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Watch the lifecycle state.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Receive typed session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// States entered so far, oldest first.
    pub fn history(&self) -> Vec<ConnectionState> {
        lock(&self.shared).machine.history().to_vec()
    }

    /// What went wrong, if the session failed, lost its link, or could not
    /// configure the vehicle.
    pub fn fault(&self) -> Option<SessionFault> {
        self.fault_rx.borrow().clone()
    }

    /// Log groups that are streaming.
    pub fn active_groups(&self) -> Vec<LogGroup> {
        lock(&self.shared).groups.clone()
    }

    /// Log groups the vehicle rejected during configuration.
    pub fn group_failures(&self) -> Vec<GroupFailure> {
        lock(&self.shared).failures.clone()
    }

    /// Monotonic time since the session was opened.
    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Wall-clock time the session was opened.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_wall
    }

    /// Wait for `FullyConfigured`, bounded by `link.connect_timeout_ms`.
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.wait_until_ready_for(Duration::from_millis(self.config.link.connect_timeout_ms))
            .await
    }

    /// Wait for `FullyConfigured` for at most `limit`.
    ///
    /// # Errors
    ///
    /// - `ConnectionFailed`: the link could not be opened
    /// - `ConnectionLost`: the link dropped or closed first
    /// - `ConfigurationFailed`: parameter writes after link-up failed
    /// - `Timeout`: none of the above within `limit`
    pub async fn wait_until_ready_for(&self, limit: Duration) -> Result<()> {
        let mut state = self.state_rx.clone();
        let mut fault = self.fault_rx.clone();

        let wait = async {
            loop {
                if let Some(f) = fault.borrow_and_update().clone() {
                    return Err(f.to_error(&self.uri));
                }
                let current = *state.borrow_and_update();
                if current.is_ready() {
                    return Ok(());
                }
                if current == ConnectionState::Disconnected {
                    return Err(FlightClientError::ConnectionLost {
                        uri: self.uri.clone(),
                        message: "disconnected before the session was ready".to_string(),
                    });
                }
                if current.is_terminal() {
                    return Err(FlightClientError::NotReady(current));
                }
                let changed = tokio::select! {
                    r = state.changed() => r,
                    r = fault.changed() => r,
                };
                if changed.is_err() {
                    return Err(FlightClientError::NotReady(*state.borrow()));
                }
            }
        };

        match timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => Err(FlightClientError::Timeout(limit.as_millis() as u64)),
        }
    }

    /// Send `position`/`yaw` every tick for `duration`.
    pub async fn hold(&self, position: Position, yaw: f64, duration: Duration) -> Result<usize> {
        self.executor.hold(position, yaw, duration).await
    }

    /// Fly a straight line from `from` to `to` at `speed` m/s.
    pub async fn move_smooth(&self, from: Position, to: Position, yaw: f64, speed: f64) -> Result<usize> {
        self.executor.move_smooth(from, to, yaw, speed).await
    }

    /// Cut actuation once, then wait `duration`.
    pub async fn stop(&self, duration: Duration) -> Result<()> {
        self.executor.stop(duration).await
    }

    /// Fly every step of `plan` in order, stopping at the first error.
    pub async fn run_plan(&self, plan: &FlightPlan) -> Result<()> {
        let steps = plan.steps()?;
        info!(
            "Flying {} segments (~{:.1} s)",
            steps.len(),
            plan.total_duration()?.as_secs_f64()
        );

        for (n, step) in steps.into_iter().enumerate() {
            debug!("Segment {}: {:?}", n, step);
            match step {
                Step::Hold {
                    position,
                    yaw,
                    duration,
                } => {
                    self.hold(position, yaw, duration).await?;
                }
                Step::Move { from, to, yaw, speed } => {
                    self.move_smooth(from, to, yaw, speed).await?;
                }
                Step::Stop { duration } => self.stop(duration).await?,
            }
        }
        Ok(())
    }

    /// Abort the running primitive at its next tick. Every later trajectory
    /// command fails with `Cancelled`; use [`emergency_stop`](Self::emergency_stop)
    /// to halt the vehicle afterwards.
    pub fn cancel_flight(&self) {
        info!("Cancelling flight");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send one stop setpoint regardless of state or cancellation.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.executor.emergency_stop().await
    }

    /// Stop streaming, release the link and wait for `Disconnected`.
    ///
    /// Groups still being started by an in-flight configuration are
    /// stopped by the event task once it sees the session closing.
    pub async fn close(&self) -> Result<()> {
        info!("Closing link to {}", self.uri);
        let groups: Vec<String> = {
            let mut shared = lock(&self.shared);
            shared.closing = true;
            shared.groups.iter().map(|g| g.name.clone()).collect()
        };
        for name in groups {
            if let Err(e) = self.link.stop_log_group(&name).await {
                warn!("Could not stop {}: {}", name, e);
            }
        }

        let closed = self.link.close().await;

        // The transport may or may not report the close itself
        let _ = self.link_events.send(LinkEvent::Disconnected);
        let mut state = self.state_rx.clone();
        let _ = state.wait_for(|s| s.is_terminal()).await;

        closed
    }

    /// Copy of everything recorded so far.
    pub fn recording(&self) -> TelemetryRecorder {
        lock(&self.shared).recorder.clone()
    }

    /// Write the recording to `path`, overwriting it.
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        lock(&self.shared).recorder.export(path)
    }

    /// Configured export path, timestamped with the session open time if
    /// requested.
    pub fn export_path(&self) -> PathBuf {
        let stamp = self.opened_wall.format("%Y%m%dT%H%M%SZ").to_string();
        self.config.recorder.resolve_path(&stamp)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
