//! Cancellable fixed-period tick generator.
//!
//! The first tick fires one period after creation; the caller does its
//! work for "time zero" before awaiting the first tick. Late ticks are
//! delayed rather than bunched, so a slow transport never causes a burst
//! of back-to-back setpoints.

use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{FlightClientError, Result};

pub struct Ticker {
    interval: Interval,
    started: Instant,
    cancel: CancellationToken,
}

impl Ticker {
    /// Start a ticker at the current instant.
    pub fn new(period: Duration, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        let mut interval = interval_at(started + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            started,
            cancel,
        }
    }

    /// Time since the ticker was created, on the monotonic clock.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail fast if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FlightClientError::Cancelled);
        }
        Ok(())
    }

    /// Wait for the next tick, or return `Cancelled` as soon as the token fires.
    pub async fn tick(&mut self) -> Result<Instant> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FlightClientError::Cancelled),
            at = self.interval.tick() => Ok(at),
        }
    }
}
