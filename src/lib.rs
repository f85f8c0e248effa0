//! # Flight Client Library
//!
//! Ground-station client for a small indoor quadrotor.
//!
//! This library connects to a vehicle over a radio link, configures its
//! controller and observer, streams onboard telemetry into an in-memory
//! recorder, flies open-loop position trajectories, and exports the
//! recording as JSON once the flight is over.

pub mod config;
pub mod error;
pub mod link;
pub mod session;
pub mod telemetry;
pub mod trajectory;
