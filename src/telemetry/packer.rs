//! # Log Group Packer
//!
//! Splits a requested variable list into log groups that each fit in one
//! telemetry packet.
//!
//! Packing is a greedy sequential fill: variables are appended to the
//! current group until the next one would exceed the bound, then a new
//! group is started. Input order is preserved across groups so the
//! subscription layout stays predictable when debugging.
//!
//! ```
//! use flight_client::telemetry::packer::{pack, PackingBound};
//! use flight_client::telemetry::variable::TelemetryVariable;
//!
//! let vars: Vec<_> = ["a", "b", "c", "d", "e", "f"]
//!     .iter()
//!     .map(|n| TelemetryVariable::float(*n))
//!     .collect();
//! let groups = pack(&vars, PackingBound::MaxVariables(5), 10);
//!
//! assert_eq!(groups.len(), 2);
//! assert_eq!(groups[0].variables.len(), 5);
//! assert_eq!(groups[1].variables[0].name, "f");
//! ```

use super::variable::TelemetryVariable;

/// Limit applied to each log group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingBound {
    /// At most this many variables per group
    MaxVariables(usize),
    /// At most this many encoded payload bytes per group
    MaxPayloadBytes(usize),
}

impl PackingBound {
    fn limit(self) -> usize {
        match self {
            PackingBound::MaxVariables(n) | PackingBound::MaxPayloadBytes(n) => n,
        }
    }

    fn cost(self, var: &TelemetryVariable) -> usize {
        match self {
            PackingBound::MaxVariables(_) => 1,
            PackingBound::MaxPayloadBytes(_) => var.width(),
        }
    }
}

/// An ordered batch of variables sharing one subscription and sample period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroup {
    pub name: String,
    pub period_ms: u64,
    pub variables: Vec<TelemetryVariable>,
    /// Set when a single variable already exceeds the bound on its own.
    pub oversized: bool,
}

impl LogGroup {
    /// Total encoded payload width in bytes.
    pub fn payload_bytes(&self) -> usize {
        self.variables.iter().map(TelemetryVariable::width).sum()
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }
}

/// Name of the `index`-th group.
pub fn group_name(index: usize) -> String {
    format!("LogConf{}", index)
}

/// Pack `variables` into ordered log groups respecting `bound`.
///
/// Every variable lands in exactly one group. A variable whose own cost
/// exceeds the bound is placed alone in a group flagged `oversized`.
/// A zero bound is treated as one.
pub fn pack(variables: &[TelemetryVariable], bound: PackingBound, period_ms: u64) -> Vec<LogGroup> {
    let limit = bound.limit().max(1);
    let mut groups: Vec<LogGroup> = Vec::new();
    let mut current: Vec<TelemetryVariable> = Vec::new();
    let mut used = 0usize;

    let flush = |vars: Vec<TelemetryVariable>, oversized: bool, groups: &mut Vec<LogGroup>| {
        groups.push(LogGroup {
            name: group_name(groups.len()),
            period_ms,
            variables: vars,
            oversized,
        });
    };

    for var in variables {
        let cost = bound.cost(var);

        if cost > limit {
            if !current.is_empty() {
                flush(std::mem::take(&mut current), false, &mut groups);
                used = 0;
            }
            flush(vec![var.clone()], true, &mut groups);
            continue;
        }

        if used + cost > limit {
            flush(std::mem::take(&mut current), false, &mut groups);
            used = 0;
        }

        current.push(var.clone());
        used += cost;
    }

    if !current.is_empty() {
        flush(current, false, &mut groups);
    }

    groups
}
