//! # Flight Plans
//!
//! A flight plan is an ordered list of segments loaded from TOML:
//!
//! ```toml
//! start = [0.0, 0.0, 0.0]
//!
//! [[segment]]
//! kind = "stop"
//! duration_s = 1.0
//!
//! [[segment]]
//! kind = "hold"
//! position = [0.0, 0.0, 0.15]
//! duration_s = 1.0
//!
//! [[segment]]
//! kind = "move"
//! to = [0.0, 0.0, 0.35]
//! speed = 0.2
//! ```
//!
//! A `move` starts wherever the previous segment left the vehicle: the
//! position of the last `hold`, the target of the last `move`, or the plan's
//! `start` if nothing precedes it. After a `stop` the position is unknown,
//! so the next `move` must be preceded by a `hold`.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tokio::time::Duration;

use super::geometry::{transit_time, Position};
use crate::error::{FlightClientError, Result};

/// One entry of a plan file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Segment {
    /// Command a fixed setpoint for a while
    Hold {
        position: Position,
        #[serde(default)]
        yaw: f64,
        duration_s: f64,
    },
    /// Fly a straight line from the previous position
    Move {
        to: Position,
        #[serde(default)]
        yaw: f64,
        speed: f64,
    },
    /// Cut actuation and wait
    Stop { duration_s: f64 },
}

/// A segment with its start position filled in, ready to fly.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Hold {
        position: Position,
        yaw: f64,
        duration: Duration,
    },
    Move {
        from: Position,
        to: Position,
        yaw: f64,
        speed: f64,
    },
    Stop {
        duration: Duration,
    },
}

impl Step {
    /// Planned wall-clock length of this step.
    pub fn duration(&self) -> Result<Duration> {
        match self {
            Step::Hold { duration, .. } | Step::Stop { duration } => Ok(*duration),
            Step::Move { from, to, speed, .. } => {
                Ok(Duration::from_secs_f64(transit_time(from, to, *speed)?))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FlightPlan {
    /// Position assumed before the first segment
    #[serde(default)]
    pub start: Option<Position>,

    #[serde(default, rename = "segment")]
    pub segments: Vec<Segment>,
}

fn seconds(value: f64, index: usize) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(FlightClientError::InvalidArgument(format!(
            "segment {}: duration must be a non-negative number of seconds, got {}",
            index, value
        )));
    }
    Ok(Duration::from_secs_f64(value))
}

impl FlightPlan {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse a plan and check that it resolves.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let plan: FlightPlan = toml::from_str(contents)?;
        plan.steps()?;
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolve every segment into a concrete step.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for negative durations, non-positive
    /// speeds, and a `move` whose start position is unknown.
    pub fn steps(&self) -> Result<Vec<Step>> {
        let mut here = self.start;
        let mut steps = Vec::with_capacity(self.segments.len());

        for (index, segment) in self.segments.iter().enumerate() {
            let step = match *segment {
                Segment::Hold { position, yaw, duration_s } => {
                    here = Some(position);
                    Step::Hold {
                        position,
                        yaw,
                        duration: seconds(duration_s, index)?,
                    }
                }
                Segment::Move { to, yaw, speed } => {
                    let from = here.ok_or_else(|| {
                        FlightClientError::InvalidArgument(format!(
                            "segment {}: move has no known start position",
                            index
                        ))
                    })?;
                    transit_time(&from, &to, speed).map_err(|e| {
                        FlightClientError::InvalidArgument(format!("segment {}: {}", index, e))
                    })?;
                    here = Some(to);
                    Step::Move { from, to, yaw, speed }
                }
                Segment::Stop { duration_s } => {
                    here = None;
                    Step::Stop {
                        duration: seconds(duration_s, index)?,
                    }
                }
            };
            steps.push(step);
        }

        Ok(steps)
    }

    /// Planned length of the whole flight.
    pub fn total_duration(&self) -> Result<Duration> {
        self.steps()?
            .iter()
            .try_fold(Duration::ZERO, |acc, step| Ok(acc + step.duration()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
start = [0.0, 0.0, 0.0]

[[segment]]
kind = "stop"
duration_s = 1.0

[[segment]]
kind = "hold"
position = [0.0, 0.0, 0.15]
duration_s = 1.0

[[segment]]
kind = "move"
to = [0.0, 0.0, 0.35]
speed = 0.2

[[segment]]
kind = "hold"
position = [0.0, 0.0, 0.35]
yaw = 10.0
duration_s = 0.5
"#;

    #[test]
    fn test_parse_and_resolve() {
        let plan = FlightPlan::from_toml(PLAN).unwrap();
        assert_eq!(plan.len(), 4);

        let steps = plan.steps().unwrap();
        assert_eq!(steps[0], Step::Stop { duration: Duration::from_secs(1) });
        assert_eq!(
            steps[2],
            Step::Move {
                from: Position::new(0.0, 0.0, 0.15),
                to: Position::new(0.0, 0.0, 0.35),
                yaw: 0.0,
                speed: 0.2,
            }
        );
        match &steps[3] {
            Step::Hold { yaw, duration, .. } => {
                assert_eq!(*yaw, 10.0);
                assert_eq!(*duration, Duration::from_millis(500));
            }
            other => panic!("Expected hold, got {:?}", other),
        }
    }

    #[test]
    fn test_total_duration() {
        let plan = FlightPlan::from_toml(PLAN).unwrap();
        let total = plan.total_duration().unwrap().as_secs_f64();
        assert!((total - 3.5).abs() < 1e-6, "total was {}", total);
    }

    #[test]
    fn test_move_uses_plan_start() {
        let plan = FlightPlan::from_toml(
            r#"
start = [1.0, 0.0, 0.0]
[[segment]]
kind = "move"
to = [2.0, 0.0, 0.0]
speed = 1.0
"#,
        )
        .unwrap();
        match &plan.steps().unwrap()[0] {
            Step::Move { from, .. } => assert_eq!(*from, Position::new(1.0, 0.0, 0.0)),
            other => panic!("Expected move, got {:?}", other),
        }
    }

    #[test]
    fn test_move_without_start_rejected() {
        let result = FlightPlan::from_toml(
            r#"
[[segment]]
kind = "move"
to = [1.0, 0.0, 0.0]
speed = 0.2
"#,
        );
        assert!(matches!(result, Err(FlightClientError::InvalidArgument(_))));
    }

    #[test]
    fn test_move_after_stop_rejected() {
        let result = FlightPlan::from_toml(
            r#"
[[segment]]
kind = "hold"
position = [0.0, 0.0, 0.3]
duration_s = 1.0
[[segment]]
kind = "stop"
duration_s = 1.0
[[segment]]
kind = "move"
to = [1.0, 0.0, 0.3]
speed = 0.2
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_speed_and_duration_rejected() {
        let zero_speed = r#"
start = [0.0, 0.0, 0.0]
[[segment]]
kind = "move"
to = [1.0, 0.0, 0.0]
speed = 0.0
"#;
        assert!(FlightPlan::from_toml(zero_speed).is_err());

        let negative = r#"
[[segment]]
kind = "stop"
duration_s = -1.0
"#;
        assert!(FlightPlan::from_toml(negative).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = FlightPlan::from_toml(
            r#"
[[segment]]
kind = "flip"
"#,
        );
        assert!(matches!(result, Err(FlightClientError::Config(_))));
    }

    #[test]
    fn test_empty_plan() {
        let plan = FlightPlan::from_toml("").unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.total_duration().unwrap(), Duration::ZERO);
    }
}
