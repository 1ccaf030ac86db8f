//! Reconciliation of inbound events and status snapshots

use std::collections::BTreeSet;

use led_protocol::{events, DeviceEvent, Inbound, InboundMessage, StatusReport};
use led_registry::{
    AcsSummary, ControllerStatus, Direction, Registry, SensorSample, HISTORY_LIMIT,
};
use tracing::{debug, error, trace};

use super::LedManager;

impl LedManager {
    /// Fold one inbound message into the registry
    ///
    /// Field changes and group flips from one message are committed
    /// together; only groups whose derived state flipped are broadcast.
    pub(super) async fn handle_inbound(&self, controller_id: &str, message: InboundMessage) {
        let mut registry = self.inner.registry.lock().await;
        registry.append_serial_log(controller_id, Direction::Rx, message.payload.clone());

        let (changed, metadata_changed) = match &message.body {
            Inbound::Event(event) => match event.name.as_str() {
                events::LED_CHANNEL_STATE | events::LED_ENABLE | events::LED_DISABLE => {
                    (apply_channel_state(&mut registry, controller_id, event), false)
                }
                events::LED_FAULT => (apply_fault(&mut registry, controller_id, event, true), false),
                events::LED_FAULT_CLEARED => {
                    (apply_fault(&mut registry, controller_id, event, false), false)
                }
                events::CAN_MESSAGE => {
                    drop(registry);
                    self.handle_button_event(controller_id, event).await;
                    return;
                }
                other => {
                    trace!("Ignoring event {} from {}", other, controller_id);
                    return;
                }
            },
            Inbound::Status(report) => apply_status(&mut registry, controller_id, report),
        };

        if changed.is_empty() && !metadata_changed {
            return;
        }
        let flipped = registry.refresh_group_states(&changed);
        if let Err(e) = registry.commit() {
            error!("Failed to commit updates from {}: {}", controller_id, e);
            return;
        }
        self.broadcast_groups(&registry, &flipped);
    }
}

/// Outputs an event addresses, by channel first and slot second
///
/// Only outputs whose `disabled` flag equals `disabled` take part, so a
/// disabled channel owner never hides an enabled slot match. A missing
/// driver index matches every driver on the controller.
fn match_outputs(
    registry: &Registry,
    controller_id: &str,
    event: &DeviceEvent,
    disabled: bool,
) -> Vec<String> {
    let mut by_channel = Vec::new();
    let mut by_slot = Vec::new();
    let drivers = registry.drivers().filter(|d| {
        d.controller_id == controller_id
            && event.driver_index.map_or(true, |index| index == d.driver_index)
    });
    for driver in drivers {
        for output in registry.driver_outputs(driver).filter(|o| o.disabled == disabled) {
            if event
                .channel
                .is_some_and(|channel| output.channels.contains(&channel))
            {
                by_channel.push(output.id.clone());
            }
            if event.slot == Some(output.slot as i64) {
                by_slot.push(output.id.clone());
            }
        }
    }
    if by_channel.is_empty() {
        by_slot
    } else {
        by_channel
    }
}

fn apply_channel_state(
    registry: &mut Registry,
    controller_id: &str,
    event: &DeviceEvent,
) -> BTreeSet<String> {
    let matched = match_outputs(registry, controller_id, event, false);
    if matched.is_empty() {
        debug!("Controller {} reported {} but no outputs matched", controller_id, event.name);
        return BTreeSet::new();
    }

    let level = event.resolved_level();
    let mut changed = BTreeSet::new();
    for output_id in matched {
        let Some(output) = registry.output_mut(&output_id) else {
            continue;
        };
        let mut touched = false;
        if let Some(level) = level {
            let level = level.max(0);
            if output.level != level {
                output.level = level;
                touched = true;
            }
        }
        let pwm = match (event.pwm, level) {
            (Some(pwm), _) => Some(pwm),
            (None, Some(level)) if level > 0 => Some(output.pwm_range().1),
            (None, Some(_)) => Some(output.min_pwm),
            (None, None) => None,
        };
        if let Some(pwm) = pwm.filter(|pwm| *pwm != output.pwm) {
            output.pwm = pwm;
            touched = true;
        }
        if let Some(fault) = event.fault.filter(|fault| *fault != output.faulty) {
            output.faulty = fault;
            touched = true;
        }
        if touched {
            changed.insert(output_id);
        }
    }
    changed
}

fn apply_fault(
    registry: &mut Registry,
    controller_id: &str,
    event: &DeviceEvent,
    is_fault: bool,
) -> BTreeSet<String> {
    let matched = match_outputs(registry, controller_id, event, false);
    let stale = match_outputs(registry, controller_id, event, true);
    if matched.is_empty() && stale.is_empty() {
        debug!(
            "Controller {} reported fault change but no outputs matched",
            controller_id
        );
        return BTreeSet::new();
    }

    let mut changed = BTreeSet::new();
    for output_id in matched {
        let Some(output) = registry.output_mut(&output_id) else {
            continue;
        };
        if output.faulty != is_fault {
            output.faulty = is_fault;
            changed.insert(output_id);
        }
    }
    // Disabled outputs never hold a fault
    for output_id in stale {
        let Some(output) = registry.output_mut(&output_id) else {
            continue;
        };
        if output.faulty {
            output.faulty = false;
            changed.insert(output_id);
        }
    }
    changed
}

/// Fold a status snapshot into controller and driver metadata
///
/// Returns the outputs whose confirmed level, PWM or fault changed, and
/// whether the controller's own metadata changed.
fn apply_status(
    registry: &mut Registry,
    controller_id: &str,
    report: &StatusReport,
) -> (BTreeSet<String>, bool) {
    let Some(controller) = registry.controller_mut(controller_id) else {
        debug!("Status from unknown controller {}", controller_id);
        return (BTreeSet::new(), false);
    };
    let previous = controller.metadata.clone();

    let acs: Vec<AcsSummary> = report
        .sensors
        .iter()
        .map(|sensor| AcsSummary {
            bus: sensor.bus.clone(),
            index: sensor.index,
            ready: sensor.ready,
            valid: sensor.valid,
            voltage: sensor.voltage,
            current: sensor.current,
            power: sensor.power,
        })
        .collect();
    let valid: Vec<&AcsSummary> = acs.iter().filter(|s| s.valid).collect();
    let voltages: Vec<f64> = valid.iter().filter_map(|s| s.voltage).collect();
    let status = ControllerStatus {
        uptime_ms: report.uptime_ms,
        drivers_reported: report.drivers_reported,
        device_name: report.device_name.clone(),
        fan: report.fan.clone(),
        total_power: valid.iter().filter_map(|s| s.power).sum(),
        total_current: valid.iter().filter_map(|s| s.current).sum(),
        total_voltage: (!voltages.is_empty())
            .then(|| voltages.iter().sum::<f64>() / voltages.len() as f64),
        voltage_sample_count: voltages.len() as u32,
        acs,
    };

    let metadata = &mut controller.metadata;
    for sensor in report.sensors.iter().filter(|s| s.valid) {
        let history = metadata.acs_history.entry(sensor.bus.clone()).or_default();
        history.push(SensorSample {
            timestamp_ms: sensor.updated_ms.or(report.uptime_ms),
            voltage: sensor.voltage,
            current: sensor.current,
            power: sensor.power,
        });
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
    }
    metadata.status = Some(status);
    let metadata_changed = *metadata != previous;

    let mut changed = BTreeSet::new();
    for driver_report in &report.drivers {
        let Some(driver_id) = registry
            .drivers()
            .find(|d| d.controller_id == controller_id && d.driver_index == driver_report.index)
            .map(|d| d.id.clone())
        else {
            continue;
        };
        let mut outputs = Vec::new();
        if let Some(driver) = registry.driver_mut(&driver_id) {
            driver.status = Some(driver_report.status.clone());
            outputs = driver.outputs.clone();
        }

        for channel in &driver_report.channels {
            let Some(output_id) = usize::try_from(channel.slot)
                .ok()
                .and_then(|slot| outputs.get(slot))
            else {
                continue;
            };
            let Some(output) = registry.output_mut(output_id) else {
                continue;
            };
            if output.disabled {
                continue;
            }
            let mut touched = false;
            if output.level != channel.level {
                output.level = channel.level;
                touched = true;
            }
            if output.pwm != channel.pwm {
                output.pwm = channel.pwm;
                touched = true;
            }
            if output.faulty != channel.fault {
                output.faulty = channel.fault;
                touched = true;
            }
            if touched {
                changed.insert(output_id.clone());
            }
        }
    }
    (changed, metadata_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use led_protocol::{ChannelReport, DriverReport, SensorReading};
    use led_registry::{ControllerSpec, DriverSpec, GroupSpec, OutputSpec};

    fn registry() -> Registry {
        let mut registry = Registry::in_memory();
        registry
            .upsert_controller(ControllerSpec {
                id: Some("c1".into()),
                ..Default::default()
            })
            .unwrap();
        registry
            .upsert_driver(DriverSpec {
                id: Some("d0".into()),
                controller_id: Some("c1".into()),
                driver_index: Some(0),
                outputs: vec![
                    OutputSpec {
                        slot: Some(1),
                        channels: Some(vec![1, 3]),
                        ..Default::default()
                    },
                    OutputSpec {
                        slot: Some(2),
                        disabled: Some(true),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            })
            .unwrap();
        registry.upsert_group(GroupSpec {
            id: Some("g".into()),
            led_ids: Some(vec!["d0_slot0".into()]),
            ..Default::default()
        });
        registry
    }

    fn event(name: &str, driver: i64, channel: Option<i64>, slot: Option<i64>) -> DeviceEvent {
        DeviceEvent {
            name: name.to_string(),
            driver_index: Some(driver),
            channel,
            slot,
            ..Default::default()
        }
    }

    #[test]
    fn test_channel_match_beats_slot_match() {
        let registry = registry();
        let matched = match_outputs(&registry, "c1", &event("x", 0, Some(1), Some(0)), false);
        assert_eq!(matched, vec!["d0_slot1".to_string()]);

        let matched = match_outputs(&registry, "c1", &event("x", 0, None, Some(0)), false);
        assert_eq!(matched, vec!["d0_slot0".to_string()]);
        assert!(match_outputs(&registry, "c2", &event("x", 0, None, Some(0)), false).is_empty());
    }

    #[test]
    fn test_channel_state_updates_only_on_change() {
        let mut registry = registry();
        let mut on = event(events::LED_CHANNEL_STATE, 0, None, Some(0));
        on.state = Some("on".into());

        let changed = apply_channel_state(&mut registry, "c1", &on);
        assert_eq!(changed, BTreeSet::from(["d0_slot0".to_string()]));
        let output = registry.output("d0_slot0").unwrap();
        assert_eq!((output.level, output.pwm), (1, 255));

        assert!(apply_channel_state(&mut registry, "c1", &on).is_empty());
    }

    #[test]
    fn test_state_events_skip_disabled_outputs() {
        let mut registry = registry();
        let mut on = event(events::LED_CHANNEL_STATE, 0, None, Some(2));
        on.level = Some(1);
        assert!(apply_channel_state(&mut registry, "c1", &on).is_empty());
        assert_eq!(registry.output("d0_slot2").unwrap().level, 0);
    }

    #[test]
    fn test_disabled_channel_owner_falls_back_to_slot() {
        let mut registry = registry();
        // Disabled slot3 owns channel 2; enabled slot2 only matches by slot
        registry
            .upsert_driver(DriverSpec {
                id: Some("d0".into()),
                outputs: vec![
                    OutputSpec {
                        slot: Some(2),
                        disabled: Some(false),
                        channels: Some(vec![0]),
                        ..Default::default()
                    },
                    OutputSpec {
                        slot: Some(3),
                        disabled: Some(true),
                        channels: Some(vec![2]),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            })
            .unwrap();

        let mut on = event(events::LED_CHANNEL_STATE, 0, Some(2), Some(2));
        on.level = Some(1);
        assert_eq!(match_outputs(&registry, "c1", &on, false), vec!["d0_slot2".to_string()]);
        let changed = apply_channel_state(&mut registry, "c1", &on);
        assert_eq!(changed, BTreeSet::from(["d0_slot2".to_string()]));
        assert_eq!(registry.output("d0_slot3").unwrap().level, 0);
    }

    #[test]
    fn test_faults_on_disabled_outputs_are_cleared() {
        let mut registry = registry();
        let fault = event(events::LED_FAULT, 0, None, Some(2));
        assert!(apply_fault(&mut registry, "c1", &fault, true).is_empty());
        assert!(!registry.output("d0_slot2").unwrap().faulty);

        registry.output_mut("d0_slot2").unwrap().faulty = true;
        let changed = apply_fault(&mut registry, "c1", &fault, true);
        assert_eq!(changed, BTreeSet::from(["d0_slot2".to_string()]));
        assert!(!registry.output("d0_slot2").unwrap().faulty);
    }

    #[test]
    fn test_status_from_unknown_controller_changes_nothing() {
        let mut registry = registry();
        let report = StatusReport {
            uptime_ms: Some(5),
            ..Default::default()
        };
        assert_eq!(apply_status(&mut registry, "ghost", &report), (BTreeSet::new(), false));

        let (_, first) = apply_status(&mut registry, "c1", &report);
        assert!(first);
        let (_, repeat) = apply_status(&mut registry, "c1", &report);
        assert!(!repeat);
    }

    #[test]
    fn test_status_caps_history_and_confirms_channels() {
        let mut registry = registry();
        let report = StatusReport {
            uptime_ms: Some(10),
            sensors: vec![
                SensorReading {
                    bus: "main".into(),
                    valid: true,
                    ready: true,
                    voltage: Some(12.0),
                    current: Some(0.5),
                    power: Some(6.0),
                    ..Default::default()
                },
                SensorReading {
                    bus: "aux".into(),
                    valid: false,
                    voltage: Some(99.0),
                    ..Default::default()
                },
            ],
            drivers: vec![DriverReport {
                index: 0,
                status: Default::default(),
                channels: vec![
                    ChannelReport {
                        slot: 0,
                        level: 1,
                        pwm: 120,
                        fault: false,
                    },
                    ChannelReport {
                        slot: 2,
                        level: 1,
                        pwm: 50,
                        fault: false,
                    },
                ],
            }],
            ..Default::default()
        };

        let mut changed = BTreeSet::new();
        for _ in 0..(HISTORY_LIMIT + 5) {
            changed.extend(apply_status(&mut registry, "c1", &report).0);
        }
        assert_eq!(changed, BTreeSet::from(["d0_slot0".to_string()]));

        let metadata = &registry.controller("c1").unwrap().metadata;
        assert_eq!(metadata.acs_history["main"].len(), HISTORY_LIMIT);
        assert!(!metadata.acs_history.contains_key("aux"));
        let status = metadata.status.as_ref().unwrap();
        assert_eq!(status.total_voltage, Some(12.0));
        assert_eq!(status.voltage_sample_count, 1);
        assert_eq!(registry.output("d0_slot2").unwrap().pwm, 0);
    }
}
