//! # Telemetry Module
//!
//! Everything between the vehicle's log subsystem and the file on disk.
//!
//! This module handles:
//! - Declaring telemetry variables and their wire widths
//! - Packing variables into bandwidth-bounded log groups
//! - Buffering incoming samples per variable
//! - Exporting the recording as JSON after the flight

pub mod packer;
pub mod recorder;
pub mod variable;

pub use packer::{pack, LogGroup, PackingBound};
pub use recorder::{Series, TelemetryRecorder};
pub use variable::{TelemetryVariable, VarType};
