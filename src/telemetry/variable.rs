//! # Telemetry Variables
//!
//! Named scalar quantities the vehicle can stream, together with the wire
//! type that fixes their encoded width inside a log packet.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FlightClientError;

/// Wire type of a logged variable.
///
/// The encoded width is what the packer charges against the payload budget
/// of a log group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VarType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    #[default]
    Float,
    Fp16,
}

impl VarType {
    /// Encoded size in bytes.
    pub fn width(self) -> usize {
        match self {
            VarType::Uint8 | VarType::Int8 => 1,
            VarType::Uint16 | VarType::Int16 | VarType::Fp16 => 2,
            VarType::Uint32 | VarType::Int32 | VarType::Float => 4,
        }
    }

    /// Canonical lowercase name, as written in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            VarType::Uint8 => "uint8",
            VarType::Int8 => "int8",
            VarType::Uint16 => "uint16",
            VarType::Int16 => "int16",
            VarType::Uint32 => "uint32",
            VarType::Int32 => "int32",
            VarType::Float => "float",
            VarType::Fp16 => "fp16",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VarType {
    type Err = FlightClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uint8" | "uint8_t" => Ok(VarType::Uint8),
            "int8" | "int8_t" => Ok(VarType::Int8),
            "uint16" | "uint16_t" => Ok(VarType::Uint16),
            "int16" | "int16_t" => Ok(VarType::Int16),
            "uint32" | "uint32_t" => Ok(VarType::Uint32),
            "int32" | "int32_t" => Ok(VarType::Int32),
            "float" => Ok(VarType::Float),
            "fp16" => Ok(VarType::Fp16),
            other => Err(FlightClientError::InvalidConfig(format!(
                "unknown variable type '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for VarType {
    type Error = FlightClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VarType> for String {
    fn from(value: VarType) -> Self {
        value.name().to_string()
    }
}

/// A named telemetry channel such as `stateEstimate.x`.
///
/// Identity is the full `group.name` string; the type only matters for
/// payload packing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TelemetryVariable {
    pub name: String,

    #[serde(default, rename = "type")]
    pub var_type: VarType,
}

impl TelemetryVariable {
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            name: name.into(),
            var_type,
        }
    }

    /// Shorthand for a `float` variable, the common case.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, VarType::Float)
    }

    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        self.var_type.width()
    }
}

impl fmt::Display for TelemetryVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.var_type)
    }
}

/// Standard subscription set: both observers, raw measurements,
/// position targets and motor commands.
pub fn default_variables() -> Vec<TelemetryVariable> {
    const FLOATS: &[&str] = &[
        // State estimates (custom observer)
        "ae483log.o_x",
        "ae483log.o_y",
        "ae483log.o_z",
        "ae483log.psi",
        "ae483log.theta",
        "ae483log.phi",
        "ae483log.v_x",
        "ae483log.v_y",
        "ae483log.v_z",
        // State estimates (default observer)
        "stateEstimate.x",
        "stateEstimate.y",
        "stateEstimate.z",
        "stateEstimate.yaw",
        "stateEstimate.pitch",
        "stateEstimate.roll",
        "stateEstimate.vx",
        "stateEstimate.vy",
        "stateEstimate.vz",
        // Measurements
        "ae483log.w_x",
        "ae483log.w_y",
        "ae483log.w_z",
        "ae483log.n_x",
        "ae483log.n_y",
        "ae483log.r",
        "ae483log.a_z",
        // Setpoint (default controller)
        "ctrltarget.x",
        "ctrltarget.y",
        "ctrltarget.z",
        // Setpoint (custom controller)
        "ae483log.o_x_des",
        "ae483log.o_y_des",
        "ae483log.o_z_des",
    ];
    // Motor power commands
    const MOTORS: &[&str] = &["ae483log.m_1", "ae483log.m_2", "ae483log.m_3", "ae483log.m_4"];

    FLOATS
        .iter()
        .map(|name| TelemetryVariable::float(*name))
        .chain(
            MOTORS
                .iter()
                .map(|name| TelemetryVariable::new(*name, VarType::Uint16)),
        )
        .collect()
}
