//! # Vehicle Configuration
//!
//! Work performed when the link reports it is fully up:
//!
//! 1. Reset the default and the custom observer
//! 2. Select the controller and enable or disable the motors
//! 3. Enable or disable the custom observer
//! 4. Register and start every log group
//!
//! Steps 1-3 are all-or-nothing: a failed parameter write aborts
//! configuration. Step 4 isolates failures per group; a group the vehicle
//! rejects is reported and skipped while the others proceed.

use tracing::{debug, error, info, warn};

use super::events::GroupFailure;
use crate::config::ControlConfig;
use crate::error::Result;
use crate::link::VehicleLink;
use crate::telemetry::packer::LogGroup;

/// Reset the default (Kalman) observer
pub const PARAM_RESET_ESTIMATION: &str = "kalman.resetEstimation";
/// Reset the custom observer
pub const PARAM_RESET_OBSERVER: &str = "ae483par.reset_observer";
/// Active controller id
pub const PARAM_CONTROLLER: &str = "stabilizer.controller";
/// Motor enable for the custom power distribution
pub const PARAM_MOTOR_SET_ENABLE: &str = "powerDist.motorSetEnable";
/// Custom observer enable
pub const PARAM_USE_OBSERVER: &str = "ae483par.use_observer";

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// Parameter writes for `control`, in the order they are applied.
pub fn control_params(control: &ControlConfig) -> Vec<(&'static str, f64)> {
    let controller = if control.use_controller {
        control.custom_controller
    } else {
        control.default_controller
    };
    vec![
        (PARAM_RESET_ESTIMATION, 1.0),
        (PARAM_RESET_OBSERVER, 1.0),
        (PARAM_CONTROLLER, f64::from(controller)),
        (PARAM_MOTOR_SET_ENABLE, flag(control.use_controller)),
        (PARAM_USE_OBSERVER, flag(control.use_observer)),
    ]
}

/// Write the observer reset and controller/observer selection parameters.
///
/// # Errors
///
/// Returns the first failed write; later writes are not attempted.
pub async fn apply_control(link: &dyn VehicleLink, control: &ControlConfig) -> Result<()> {
    for (name, value) in control_params(control) {
        debug!("Setting {} = {}", name, value);
        link.set_param(name, value).await?;
    }
    info!(
        "Controller {} ({}), observer {}",
        if control.use_controller { "custom" } else { "default" },
        if control.use_controller { "motors enabled" } else { "motors disabled" },
        if control.use_observer { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Outcome of activating a set of log groups.
#[derive(Debug, Default)]
pub struct Subscription {
    pub active: Vec<LogGroup>,
    pub failures: Vec<GroupFailure>,
}

async fn activate(link: &dyn VehicleLink, group: &LogGroup) -> Result<()> {
    link.add_log_group(group).await?;
    link.start_log_group(&group.name).await
}

/// Register and start each group; failures are collected, not propagated.
pub async fn subscribe(link: &dyn VehicleLink, groups: Vec<LogGroup>) -> Subscription {
    let mut sub = Subscription::default();

    for group in groups {
        if group.oversized {
            warn!(
                "{} holds a single variable larger than the packing bound: {}",
                group.name,
                group.variable_names().join(", ")
            );
        }

        match activate(link, &group).await {
            Ok(()) => {
                debug!("Started {} ({} variables, {} ms)", group.name, group.variables.len(), group.period_ms);
                sub.active.push(group);
            }
            Err(e) => {
                error!("Could not start {} because {}", group.name, e);
                for name in group.variable_names() {
                    error!(" - {}", name);
                }
                sub.failures.push(GroupFailure {
                    group: group.name.clone(),
                    variables: group.variables.iter().map(|v| v.name.clone()).collect(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Logging {} of {} groups",
        sub.active.len(),
        sub.active.len() + sub.failures.len()
    );
    sub
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlightClientError;
    use crate::link::mocks::{LinkCall, RecordingLink};
    use crate::link::MockVehicleLink;
    use crate::telemetry::packer::{pack, PackingBound};
    use crate::telemetry::variable::{TelemetryVariable, VarType};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn groups() -> Vec<LogGroup> {
        let vars: Vec<_> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|n| TelemetryVariable::float(*n))
            .collect();
        pack(&vars, PackingBound::MaxVariables(2), 10)
    }

    #[test]
    fn test_control_params_custom_controller() {
        let control = ControlConfig {
            use_controller: true,
            use_observer: true,
            ..ControlConfig::default()
        };
        assert_eq!(
            control_params(&control),
            vec![
                ("kalman.resetEstimation", 1.0),
                ("ae483par.reset_observer", 1.0),
                ("stabilizer.controller", 4.0),
                ("powerDist.motorSetEnable", 1.0),
                ("ae483par.use_observer", 1.0),
            ]
        );
    }

    #[test]
    fn test_control_params_default_controller() {
        let control = ControlConfig {
            use_controller: false,
            use_observer: false,
            ..ControlConfig::default()
        };
        let params = control_params(&control);
        assert_eq!(params[2], ("stabilizer.controller", 1.0));
        assert_eq!(params[3], ("powerDist.motorSetEnable", 0.0));
        assert_eq!(params[4], ("ae483par.use_observer", 0.0));
    }

    #[tokio::test]
    async fn test_apply_control_writes_in_order() {
        let mut link = MockVehicleLink::new();
        let mut seq = Sequence::new();
        for (name, value) in control_params(&ControlConfig::default()) {
            link.expect_set_param()
                .with(eq(name), eq(value))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        apply_control(&link, &ControlConfig::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_control_stops_at_first_failure() {
        let mut link = MockVehicleLink::new();
        link.expect_set_param()
            .with(eq("kalman.resetEstimation"), eq(1.0))
            .times(1)
            .returning(|name, _| {
                Err(FlightClientError::Parameter {
                    name: name.to_string(),
                    reason: "timeout".to_string(),
                })
            });
        // No further expectations: any later write would panic the mock

        let result = apply_control(&link, &ControlConfig::default()).await;
        assert!(matches!(result, Err(FlightClientError::Parameter { .. })));
    }

    #[tokio::test]
    async fn test_subscribe_adds_then_starts_each_group() {
        let link = RecordingLink::new();
        let sub = subscribe(&link, groups()).await;

        assert_eq!(sub.active.len(), 3);
        assert!(sub.failures.is_empty());
        assert_eq!(
            link.calls(),
            vec![
                LinkCall::AddGroup("LogConf0".into()),
                LinkCall::StartGroup("LogConf0".into()),
                LinkCall::AddGroup("LogConf1".into()),
                LinkCall::StartGroup("LogConf1".into()),
                LinkCall::AddGroup("LogConf2".into()),
                LinkCall::StartGroup("LogConf2".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_subscribe_isolates_failed_group() {
        let link = RecordingLink::new();
        link.reject_variable("c");

        let sub = subscribe(&link, groups()).await;

        assert_eq!(sub.active.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(), vec!["LogConf0", "LogConf2"]);
        assert_eq!(sub.failures.len(), 1);
        let failure = &sub.failures[0];
        assert_eq!(failure.group, "LogConf1");
        assert_eq!(failure.variables, vec!["c".to_string(), "d".to_string()]);
        assert!(failure.reason.contains("c"));
        assert!(!link.calls().contains(&LinkCall::StartGroup("LogConf1".into())));
    }

    #[tokio::test]
    async fn test_subscribe_start_failure_is_isolated() {
        let mut link = MockVehicleLink::new();
        link.expect_add_log_group().returning(|_| Ok(()));
        link.expect_start_log_group()
            .with(eq("LogConf0"))
            .returning(|name| {
                Err(FlightClientError::LogGroup {
                    group: name.to_string(),
                    reason: "bad configuration".to_string(),
                })
            });
        link.expect_start_log_group().returning(|_| Ok(()));

        let sub = subscribe(&link, groups()).await;
        assert_eq!(sub.active.len(), 2);
        assert_eq!(sub.failures[0].group, "LogConf0");
    }

    #[tokio::test]
    async fn test_oversized_group_is_still_attempted() {
        let link = RecordingLink::new();
        let vars = vec![TelemetryVariable::new("wide", VarType::Float)];
        let groups = pack(&vars, PackingBound::MaxPayloadBytes(2), 10);
        assert!(groups[0].oversized);

        let sub = subscribe(&link, groups).await;
        assert_eq!(sub.active.len(), 1);
    }
}
