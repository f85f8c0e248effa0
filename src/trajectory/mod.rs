//! # Trajectory Module
//!
//! Open-loop position setpoint generation.
//!
//! This module handles:
//! - Straight-line geometry between waypoints
//! - The cancellable tick generator that paces setpoints
//! - Hold, smooth-move and stop primitives
//! - Flight plans loaded from TOML

pub mod executor;
pub mod geometry;
pub mod plan;
pub mod ticker;

pub use executor::TrajectoryExecutor;
pub use geometry::{Position, Setpoint};
pub use plan::{FlightPlan, Segment, Step};
