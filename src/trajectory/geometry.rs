//! Positions, setpoints and straight-line interpolation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FlightClientError, Result};

/// A point in the world frame, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: &Position) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2) + (other.z - self.z).powi(2)).sqrt()
    }

    /// `self + s * (other - self)`.
    pub fn lerp(&self, other: &Position, s: f64) -> Position {
        Position {
            x: self.x + s * (other.x - self.x),
            y: self.y + s * (other.y - self.y),
            z: self.z + s * (other.z - self.z),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Position {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Position> for [f64; 3] {
    fn from(p: Position) -> Self {
        [p.x, p.y, p.z]
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3}, {:.3}]", self.x, self.y, self.z)
    }
}

/// What is sent to the vehicle on one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub position: Position,
    /// Degrees
    pub yaw: f64,
}

impl Setpoint {
    pub const fn new(position: Position, yaw: f64) -> Self {
        Self { position, yaw }
    }
}

/// Seconds needed to cover `from -> to` at `speed` m/s.
///
/// Zero when the points coincide. Speed must be positive and finite.
pub fn transit_time(from: &Position, to: &Position, speed: f64) -> Result<f64> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(FlightClientError::InvalidArgument(format!(
            "speed must be positive, got {}",
            speed
        )));
    }
    if !from.is_finite() || !to.is_finite() {
        return Err(FlightClientError::InvalidArgument(format!(
            "non-finite position in move {} -> {}",
            from, to
        )));
    }
    Ok(from.distance_to(to) / speed)
}

/// Fraction of the segment that should be covered after `elapsed` seconds.
///
/// A zero-length segment is complete immediately.
pub fn progress(elapsed: f64, total: f64) -> f64 {
    if total <= 0.0 {
        1.0
    } else {
        elapsed / total
    }
}
