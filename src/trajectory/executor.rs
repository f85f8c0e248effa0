//! # Trajectory Executor
//!
//! Turns hold/move/stop requests into a time-driven stream of setpoints.
//!
//! All primitives are open loop: they never look at telemetry, and the
//! vehicle's onboard controller is responsible for tracking the stream.
//! Each call blocks its caller for the scheduled duration so a flight
//! script reads as a plain sequence of steps.
//!
//! Readiness is checked on entry and before every transmission; if the
//! session leaves `FullyConfigured` mid-segment the loop ends with
//! [`FlightClientError::NotReady`]. Transmission errors are not retried
//! here and end the loop immediately.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::geometry::{progress, transit_time, Position, Setpoint};
use super::ticker::Ticker;
use crate::error::{FlightClientError, Result};
use crate::link::VehicleLink;
use crate::session::state::ConnectionState;

pub struct TrajectoryExecutor {
    link: Arc<dyn VehicleLink>,
    state: watch::Receiver<ConnectionState>,
    tick_interval: Duration,
    cancel: CancellationToken,
}

impl TrajectoryExecutor {
    /// # Arguments
    ///
    /// * `link` - Transport that receives the setpoints
    /// * `state` - Session state feed, used to enforce readiness
    /// * `tick_interval` - Setpoint period
    /// * `cancel` - Token checked on every tick
    pub fn new(
        link: Arc<dyn VehicleLink>,
        state: watch::Receiver<ConnectionState>,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            link,
            state,
            tick_interval,
            cancel,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = *self.state.borrow();
        if !state.is_ready() {
            return Err(FlightClientError::NotReady(state));
        }
        Ok(())
    }

    fn ticker(&self) -> Result<Ticker> {
        let ticker = Ticker::new(self.tick_interval, self.cancel.clone());
        ticker.check()?;
        Ok(ticker)
    }

    async fn send(&self, sp: &Setpoint) -> Result<()> {
        self.ensure_ready()?;
        let p = sp.position;
        self.link
            .send_position_setpoint(p.x, p.y, p.z, sp.yaw)
            .await
            .map_err(|e| {
                error!("Setpoint {} yaw {} not sent: {}", p, sp.yaw, e);
                e
            })
    }

    /// Send the same absolute setpoint every tick for `duration`.
    ///
    /// Returns the number of setpoints sent, at least
    /// `duration / tick_interval`.
    pub async fn hold(&self, position: Position, yaw: f64, duration: Duration) -> Result<usize> {
        self.ensure_ready()?;
        info!(
            "Move to {}, {}, {} with yaw {} degrees for {} seconds",
            position.x,
            position.y,
            position.z,
            yaw,
            duration.as_secs_f64()
        );

        let sp = Setpoint::new(position, yaw);
        let mut ticker = self.ticker()?;
        let mut sent = 0;
        while ticker.elapsed() < duration {
            self.send(&sp).await?;
            sent += 1;
            ticker.tick().await?;
        }
        debug!("Hold finished after {} setpoints", sent);
        Ok(sent)
    }

    /// Fly a straight line from `from` to `to` at `speed` m/s, yaw held.
    ///
    /// Each tick sends `from + s * (to - from)` with `s = elapsed / T`,
    /// `T = |to - from| / speed`. The loop ends right after the first
    /// setpoint with `s >= 1`; that setpoint is `to`. A zero-length move
    /// sends exactly one setpoint.
    pub async fn move_smooth(&self, from: Position, to: Position, yaw: f64, speed: f64) -> Result<usize> {
        self.ensure_ready()?;
        let total = transit_time(&from, &to, speed)?;
        info!(
            "Move smoothly from {} to {} with yaw {} degrees at {} meters / second",
            from, to, yaw, speed
        );

        let mut ticker = self.ticker()?;
        let mut sent = 0;
        loop {
            let s = progress(ticker.elapsed().as_secs_f64(), total);
            let sp = Setpoint::new(from.lerp(&to, s.min(1.0)), yaw);
            self.send(&sp).await?;
            sent += 1;
            if s >= 1.0 {
                break;
            }
            ticker.tick().await?;
        }
        debug!("Move finished after {} setpoints ({:.2} s planned)", sent, total);
        Ok(sent)
    }

    /// Send one stop setpoint, then idle for `duration`.
    pub async fn stop(&self, duration: Duration) -> Result<()> {
        self.ensure_ready()?;
        info!("Stop for {} seconds", duration.as_secs_f64());

        let mut ticker = self.ticker()?;
        self.link.send_stop_setpoint().await.map_err(|e| {
            error!("Stop setpoint not sent: {}", e);
            e
        })?;
        while ticker.elapsed() < duration {
            ticker.tick().await?;
        }
        Ok(())
    }

    /// Send one stop setpoint regardless of readiness or cancellation.
    pub async fn emergency_stop(&self) -> Result<()> {
        info!("Emergency stop");
        self.link.send_stop_setpoint().await
    }
}
