//! Read-only projections for external consumers

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::*;
use crate::registry::Registry;

/// Group state as exposed to entities and dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStateView {
    pub name: String,
    pub is_on: bool,
    pub brightness: i64,
    /// Enabled members only
    pub led_ids: Vec<String>,
    pub led_count: usize,
    pub faulty_leds: Vec<String>,
}

/// Flattened output with its driver's addressing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDescriptor {
    pub id: String,
    pub slot: usize,
    pub name: String,
    pub channels: Vec<i64>,
    pub faulty: bool,
    pub disabled: bool,
    pub controller_id: String,
    pub driver_id: String,
    pub driver_index: i64,
    pub driver_name: String,
    pub min_pwm: i64,
    pub max_pwm: i64,
    pub pwm: i64,
    pub target_pwm: i64,
    pub level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SsrSnapshot {
    pub base_address: u8,
    pub entries: Vec<SsrEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchPanelSnapshot {
    pub ports: Vec<PatchPanelPort>,
}

/// Full copy of the registry for API consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub controllers: Vec<Controller>,
    pub drivers: Vec<Driver>,
    pub groups: Vec<Group>,
    pub led_outputs: Vec<OutputDescriptor>,
    pub switches: Vec<Switch>,
    pub buttons: Vec<Button>,
    pub learned_buttons: Vec<LearnedButton>,
    pub ssr: SsrSnapshot,
    pub patch_panel: PatchPanelSnapshot,
}

impl Registry {
    pub fn groups_state_view(&self) -> BTreeMap<String, GroupStateView> {
        self.groups()
            .map(|group| {
                let active: Vec<&Output> = self
                    .resolve_output_ids(&group.led_ids)
                    .into_iter()
                    .map(|(_, output)| output)
                    .filter(|output| !output.disabled)
                    .collect();
                let view = GroupStateView {
                    name: group.name.clone(),
                    is_on: group.is_on,
                    brightness: group.brightness,
                    led_ids: active.iter().map(|o| o.id.clone()).collect(),
                    led_count: active.len(),
                    faulty_leds: active
                        .iter()
                        .filter(|o| o.faulty)
                        .map(|o| o.id.clone())
                        .collect(),
                };
                (group.id.clone(), view)
            })
            .collect()
    }

    pub fn list_output_descriptors(&self) -> Vec<OutputDescriptor> {
        self.drivers()
            .flat_map(|driver| {
                self.driver_outputs(driver).map(move |output| OutputDescriptor {
                    id: output.id.clone(),
                    slot: output.slot,
                    name: output.name.clone(),
                    channels: output.channels.clone(),
                    faulty: output.faulty,
                    disabled: output.disabled,
                    controller_id: driver.controller_id.clone(),
                    driver_id: driver.id.clone(),
                    driver_index: driver.driver_index,
                    driver_name: driver.name.clone(),
                    min_pwm: output.min_pwm,
                    max_pwm: output.max_pwm,
                    pwm: output.pwm,
                    target_pwm: output.target_pwm,
                    level: output.level,
                })
            })
            .collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            controllers: self.controllers().cloned().collect(),
            drivers: self.drivers().cloned().collect(),
            groups: self.groups().cloned().collect(),
            led_outputs: self.list_output_descriptors(),
            switches: self.switches().cloned().collect(),
            buttons: self.buttons().cloned().collect(),
            learned_buttons: self.learned_buttons().cloned().collect(),
            ssr: SsrSnapshot {
                base_address: self.ssr_config().base_address,
                entries: self.ssr_config().entries.values().cloned().collect(),
            },
            patch_panel: PatchPanelSnapshot {
                ports: self.patch_panel_ports(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_view_hides_disabled_members() {
        let mut registry = Registry::in_memory();
        registry
            .upsert_driver(DriverSpec {
                id: Some("d".into()),
                controller_id: Some("c".into()),
                outputs: vec![
                    OutputSpec { id: Some("a".into()), faulty: Some(true), ..Default::default() },
                    OutputSpec { id: Some("b".into()), ..Default::default() },
                    OutputSpec { id: Some("x".into()), disabled: Some(true), ..Default::default() },
                ],
                ..Default::default()
            })
            .unwrap();
        registry.upsert_group(GroupSpec {
            id: Some("g".into()),
            name: Some("Porch".into()),
            led_ids: Some(vec!["a".into(), "x".into(), "b".into(), "ghost".into()]),
            brightness: Some(30),
            ..Default::default()
        });

        let view = &registry.groups_state_view()["g"];
        assert_eq!(view.name, "Porch");
        assert_eq!(view.led_ids, vec!["a", "b"]);
        assert_eq!(view.led_count, 2);
        assert_eq!(view.faulty_leds, vec!["a"]);
        assert_eq!(view.brightness, 30);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut registry = Registry::in_memory();
        registry
            .upsert_driver(DriverSpec {
                id: Some("d".into()),
                controller_id: Some("c".into()),
                driver_index: Some(2),
                ..Default::default()
            })
            .unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.led_outputs.len(), 4);
        assert_eq!(snapshot.led_outputs[3].driver_index, 2);
        assert_eq!(snapshot.patch_panel.ports.len(), usize::from(PATCH_PANEL_PORTS));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["led_outputs"][0]["id"], "d_slot0");
    }
}
