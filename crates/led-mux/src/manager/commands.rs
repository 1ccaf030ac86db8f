//! Strict user-facing commands and the batch builders behind them

use std::collections::{BTreeMap, BTreeSet};

use led_protocol::{Command, DriverChannels, LedAction, CHANNELS_PER_DRIVER, UNADDRESSED};
use led_registry::{ControllerSpec, Direction, MapFilter, Registry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::LedManager;
use crate::error::ManagerError;

/// controller id → driver index → channel → PWM
pub type PwmUpdates = BTreeMap<String, BTreeMap<i64, BTreeMap<i64, i64>>>;

/// One channel's PWM range and current mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedChannelConfig {
    pub controller_id: String,
    pub driver_index: i64,
    pub channel: i64,
    #[serde(default, alias = "mip")]
    pub min_pwm: i64,
    #[serde(default = "default_max_pwm", alias = "mp")]
    pub max_pwm: i64,
    #[serde(default)]
    pub current_high: bool,
}

fn default_max_pwm() -> i64 {
    led_registry::DEFAULT_MAX_PWM
}

/// Where an SSR change was sent and the relay mask it carried
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsrDispatch {
    pub controller_id: String,
    pub mask: u16,
}

/// SSR frame trailer expected by the relay board
const SSR_FRAME_TRAILER: [u8; 3] = [0x33, 0x22, 0x11];

/// Regroup per-channel PWM updates by value
///
/// Every distinct PWM value becomes one `{"cm":"led","a":"pwm"}` message per
/// controller, listing each driver and the channels that converge on it.
pub fn batch_pwm_updates(updates: &PwmUpdates) -> Vec<(String, Command)> {
    let mut batches = Vec::new();
    for (controller_id, drivers) in updates {
        let mut by_value: BTreeMap<i64, BTreeMap<i64, Vec<i64>>> = BTreeMap::new();
        for (&driver_index, channels) in drivers {
            for (&channel, &pwm) in channels {
                by_value
                    .entry(pwm)
                    .or_default()
                    .entry(driver_index)
                    .or_default()
                    .push(channel);
            }
        }
        for (pwm, drivers) in by_value {
            let drvs = drivers
                .into_iter()
                .map(|(driver, channels)| DriverChannels::new(driver, channels))
                .collect();
            batches.push((controller_id.clone(), Command::led_pwm(drvs, pwm)));
        }
    }
    batches
}

impl LedManager {
    /// Queue every batch, failing before anything is sent if a target
    /// controller has no transport
    pub(super) fn dispatch_strict(
        &self,
        registry: &mut Registry,
        batches: Vec<(String, Command)>,
    ) -> Result<Vec<String>, ManagerError> {
        if let Some((controller_id, _)) = batches
            .iter()
            .find(|(controller_id, _)| !self.inner.mux.is_registered(controller_id))
        {
            return Err(ManagerError::NotConnected(controller_id.clone()));
        }

        let mut controllers = Vec::new();
        for (controller_id, command) in batches {
            registry.append_serial_log(&controller_id, Direction::Tx, command.to_value()?);
            self.inner.mux.send(&controller_id, &command)?;
            if !controllers.contains(&controller_id) {
                controllers.push(controller_id);
            }
        }
        Ok(controllers)
    }

    /// Queue what can be queued; unreachable controllers are skipped
    pub(super) fn dispatch_ambient(&self, registry: &mut Registry, batches: Vec<(String, Command)>) {
        for (controller_id, command) in batches {
            if !self.inner.mux.is_registered(&controller_id) {
                debug!("Skipping update for unconnected controller {}", controller_id);
                continue;
            }
            if let Ok(payload) = command.to_value() {
                registry.append_serial_log(&controller_id, Direction::Tx, payload);
            }
            if let Err(e) = self.inner.mux.send(&controller_id, &command) {
                debug!("Controller {} update failed: {}", controller_id, e);
            }
        }
    }

    /// Switch a group on at its stored brightness, or off
    ///
    /// "On" skips disabled and faulted members; "off" still addresses
    /// faulted members so it is always deliverable. Returns the controllers
    /// that were sent a command.
    pub async fn apply_group_action(
        &self,
        group_id: &str,
        on: bool,
    ) -> Result<Vec<String>, ManagerError> {
        debug!("Applying {} to group {}", if on { "on" } else { "off" }, group_id);
        let mut registry = self.inner.registry.lock().await;
        if registry.group(group_id).is_none() {
            return Err(ManagerError::UnknownGroup(group_id.to_string()));
        }

        let batches: Vec<(String, Command)> = if on {
            registry
                .build_group_pwm_map(group_id, MapFilter::default(), None)
                .into_iter()
                .map(|(controller_id, drivers)| {
                    let drvs = drivers
                        .into_iter()
                        .map(|(driver, slots)| DriverChannels::new(driver, slots.to_vec()))
                        .collect();
                    (controller_id, Command::led_on(drvs))
                })
                .collect()
        } else {
            registry
                .build_group_channel_map(group_id, MapFilter::WITH_FAULTY)
                .into_iter()
                .map(|(controller_id, drivers)| {
                    let drvs = drivers
                        .into_iter()
                        .map(|(driver, channels)| DriverChannels::new(driver, channels))
                        .collect();
                    (controller_id, Command::led_off(drvs))
                })
                .collect()
        };
        if batches.is_empty() {
            return Err(ManagerError::NoLedsAssigned(group_id.to_string()));
        }

        self.dispatch_strict(&mut registry, batches)
    }

    /// Send explicit per-output PWM values for a group's members
    ///
    /// Each target is clamped to its output's range and stored as that
    /// output's `target_pwm`. A supplied brightness is stored too and
    /// broadcast if it changed.
    pub async fn apply_group_pwm_targets(
        &self,
        group_id: &str,
        targets: &BTreeMap<String, i64>,
        brightness: Option<i64>,
    ) -> Result<Vec<String>, ManagerError> {
        if targets.is_empty() {
            return Err(ManagerError::EmptyTargets);
        }
        let mut registry = self.inner.registry.lock().await;
        let group = registry
            .group(group_id)
            .ok_or_else(|| ManagerError::UnknownGroup(group_id.to_string()))?;
        debug!("Applying PWM targets for group {} ({} LEDs)", group_id, targets.len());

        let members = registry.resolve_output_ids(&group.led_ids);
        if members.is_empty() {
            return Err(ManagerError::NoLedsAssigned(group_id.to_string()));
        }

        let mut updates = PwmUpdates::new();
        let mut stored = BTreeMap::new();
        for (driver, output) in members {
            let Some(&requested) = targets.get(&output.id) else {
                continue;
            };
            if output.disabled || driver.controller_id.is_empty() {
                continue;
            }
            let pwm = output.clamp_pwm(requested);
            let channels = updates
                .entry(driver.controller_id.clone())
                .or_default()
                .entry(driver.driver_index)
                .or_default();
            for channel in output.addressed_channels() {
                channels.insert(channel, pwm);
            }
            stored.insert(output.id.clone(), pwm);
        }
        if stored.is_empty() {
            return Err(ManagerError::NoMatchingTargets);
        }

        let controllers = self.dispatch_strict(&mut registry, batch_pwm_updates(&updates))?;
        registry.apply_output_targets(&stored);

        let mut brightness_changed = BTreeSet::new();
        if let (Some(value), Some(group)) = (brightness, registry.group_mut(group_id)) {
            let value = value.clamp(0, 100);
            if group.brightness != value {
                group.brightness = value;
                brightness_changed.insert(group_id.to_string());
            }
        }

        registry.commit()?;
        self.broadcast_groups(&registry, &brightness_changed);
        debug!("Group {} PWM targets dispatched to {:?}", group_id, controllers);
        Ok(controllers)
    }

    /// Drive one output at `pwm`, clamped to its range
    pub async fn set_output_pwm(&self, output_id: &str, pwm: i64) -> Result<Vec<String>, ManagerError> {
        let mut registry = self.inner.registry.lock().await;
        let (driver, output) = registry
            .output_entry(output_id)
            .ok_or_else(|| ManagerError::UnknownOutput(output_id.to_string()))?;
        if driver.controller_id.is_empty() {
            return Err(ManagerError::MissingMapping(output_id.to_string()));
        }

        let value = output.clamp_pwm(pwm);
        let (min_pwm, _) = output.pwm_range();
        let mut updates = PwmUpdates::new();
        let channels = updates
            .entry(driver.controller_id.clone())
            .or_default()
            .entry(driver.driver_index)
            .or_default();
        for channel in output.addressed_channels() {
            channels.insert(channel, value);
        }

        let controllers = self.dispatch_strict(&mut registry, batch_pwm_updates(&updates))?;
        if let Some(output) = registry.output_mut(output_id) {
            output.pwm = value;
            output.level = i64::from(value > min_pwm);
        }
        self.commit_output_change(&mut registry, output_id)?;
        Ok(controllers)
    }

    /// Switch one output on at its stored target, or off
    ///
    /// An output whose stored target is at or below its minimum lights at
    /// its maximum instead.
    pub async fn set_output_state(&self, output_id: &str, on: bool) -> Result<Vec<String>, ManagerError> {
        let mut registry = self.inner.registry.lock().await;
        let (driver, output) = registry
            .output_entry(output_id)
            .ok_or_else(|| ManagerError::UnknownOutput(output_id.to_string()))?;
        if driver.controller_id.is_empty() {
            return Err(ManagerError::MissingMapping(output_id.to_string()));
        }

        let (min_pwm, max_pwm) = output.pwm_range();
        let target = match output.clamp_pwm(output.target_pwm) {
            stored if stored > min_pwm => stored,
            _ => max_pwm,
        };
        let channels = output.addressed_channels();
        let command = if on {
            let mut slots = [UNADDRESSED; CHANNELS_PER_DRIVER];
            for channel in &channels {
                if let Some(slot) = usize::try_from(*channel).ok().and_then(|c| slots.get_mut(c)) {
                    *slot = target;
                }
            }
            Command::led_on(vec![DriverChannels::new(driver.driver_index, slots.to_vec())])
        } else {
            Command::led_off(vec![DriverChannels::new(driver.driver_index, channels)])
        };
        let controller_id = driver.controller_id.clone();

        let controllers = self.dispatch_strict(&mut registry, vec![(controller_id, command)])?;
        if let Some(output) = registry.output_mut(output_id) {
            output.pwm = if on { target } else { min_pwm };
            output.level = i64::from(on && output.pwm > min_pwm);
        }
        self.commit_output_change(&mut registry, output_id)?;
        Ok(controllers)
    }

    fn commit_output_change(&self, registry: &mut Registry, output_id: &str) -> Result<(), ManagerError> {
        let flipped = registry.refresh_group_states(&BTreeSet::from([output_id.to_string()]));
        registry.commit()?;
        self.broadcast_groups(registry, &flipped);
        Ok(())
    }

    /// Switch an SSR relay through the CAN bridge controller
    pub async fn set_ssr_state(&self, ssr_id: &str, on: bool) -> Result<SsrDispatch, ManagerError> {
        let mut registry = self.inner.registry.lock().await;
        let controller = registry.can_controller().ok_or(ManagerError::NoCanInterface)?;
        if !self.inner.mux.is_registered(&controller.id) {
            return Err(ManagerError::CanNotConnected);
        }
        let controller_id = controller.id.clone();
        let sender = can_sender_id(controller.can_sender_id.as_deref());

        let base_address = registry.ssr_config().base_address;
        if base_address == 0 {
            return Err(ManagerError::SsrBaseAddressUnset);
        }
        let entry = registry
            .ssr_entry(ssr_id)
            .ok_or_else(|| ManagerError::UnknownSsrEntry(ssr_id.to_string()))?;
        let bit = 1u16
            .checked_shl(u32::from(entry.bit_index))
            .ok_or_else(|| ManagerError::InvalidValue(format!("SSR bit {}", entry.bit_index)))?;

        let current = registry.ssr_state_mask();
        let mask = if on { current | bit } else { current & !bit };
        let [mask_hi, mask_lo] = mask.to_be_bytes();
        let mut data = vec![base_address, 0, 3, mask_hi, mask_lo];
        data.extend_from_slice(&SSR_FRAME_TRAILER);

        debug!(
            "SSR {} on={} base={} mask={:#06x} controller={}",
            ssr_id, on, base_address, mask, controller_id
        );
        self.dispatch_strict(
            &mut registry,
            vec![(controller_id.clone(), Command::can_send(sender, data))],
        )?;
        registry.set_ssr_entry_state(ssr_id, on)?;
        registry.commit()?;
        Ok(SsrDispatch {
            controller_id,
            mask,
        })
    }

    /// Send per-channel PWM range and current configuration
    pub async fn apply_led_configs(
        &self,
        configs: &[LedChannelConfig],
    ) -> Result<BTreeMap<String, Vec<(i64, i64)>>, ManagerError> {
        if configs.is_empty() {
            return Err(ManagerError::InvalidValue("no LED configs provided".into()));
        }
        let mut batches = Vec::with_capacity(configs.len());
        let mut applied: BTreeMap<String, Vec<(i64, i64)>> = BTreeMap::new();
        for config in configs {
            if config.controller_id.is_empty() {
                return Err(ManagerError::InvalidValue(
                    "LED config without a controller id".into(),
                ));
            }
            let command = Command::Led(LedAction::Cfg {
                driver: config.driver_index,
                channel: config.channel,
                min_pwm: config.min_pwm,
                max_pwm: config.max_pwm,
                current_high: config.current_high,
            });
            batches.push((config.controller_id.clone(), command));
            applied
                .entry(config.controller_id.clone())
                .or_default()
                .push((config.driver_index, config.channel));
        }

        let mut registry = self.inner.registry.lock().await;
        self.dispatch_strict(&mut registry, batches)?;
        info!("Applied {} LED channel configs", configs.len());
        Ok(applied)
    }

    /// Persist a controller's polling flag and start or stop its poll loop
    pub async fn set_controller_poll(&self, controller_id: &str, enabled: bool) -> Result<(), ManagerError> {
        {
            let mut registry = self.inner.registry.lock().await;
            if registry.controller(controller_id).is_none() {
                return Err(ManagerError::UnknownController(controller_id.to_string()));
            }
            registry.upsert_controller(ControllerSpec {
                id: Some(controller_id.to_string()),
                polling_enabled: Some(enabled),
                ..Default::default()
            })?;
            registry.commit()?;
        }
        let mut state = self.inner.state.lock().await;
        self.apply_polling(&mut state, controller_id, enabled).await;
        Ok(())
    }
}

/// Sender id for CAN frames: numeric ids are normalised, anything else is
/// passed through, missing means `"0"`
fn can_sender_id(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") => "0".to_string(),
        Some(text) => match text.parse::<i64>() {
            Ok(number) => number.to_string(),
            Err(_) => {
                warn!("Using non-numeric CAN sender id {:?}", text);
                text.to_string()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(entries: &[(&str, i64, i64, i64)]) -> PwmUpdates {
        let mut updates = PwmUpdates::new();
        for &(controller, driver, channel, pwm) in entries {
            updates
                .entry(controller.to_string())
                .or_default()
                .entry(driver)
                .or_default()
                .insert(channel, pwm);
        }
        updates
    }

    #[test]
    fn test_equal_values_share_one_message() {
        let batches = batch_pwm_updates(&updates(&[
            ("c1", 0, 0, 40),
            ("c1", 0, 2, 40),
            ("c1", 1, 3, 40),
            ("c1", 1, 0, 90),
        ]));
        assert_eq!(
            batches,
            vec![
                (
                    "c1".to_string(),
                    Command::led_pwm(
                        vec![DriverChannels::new(0, vec![0, 2]), DriverChannels::new(1, vec![3])],
                        40
                    )
                ),
                (
                    "c1".to_string(),
                    Command::led_pwm(vec![DriverChannels::new(1, vec![0])], 90)
                ),
            ]
        );
    }

    #[test]
    fn test_batches_stay_per_controller() {
        let batches = batch_pwm_updates(&updates(&[("a", 0, 0, 10), ("b", 0, 0, 10)]));
        let controllers: Vec<&str> = batches.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(controllers, vec!["a", "b"]);
    }

    #[test]
    fn test_can_sender_id_normalisation() {
        assert_eq!(can_sender_id(None), "0");
        assert_eq!(can_sender_id(Some(" ")), "0");
        assert_eq!(can_sender_id(Some("007")), "7");
        assert_eq!(can_sender_id(Some("bridge")), "bridge");
    }

    #[test]
    fn test_led_config_accepts_short_keys() {
        let config: LedChannelConfig = serde_json::from_str(
            r#"{"controller_id":"c1","driver_index":0,"channel":2,"mip":5,"current_high":true}"#,
        )
        .unwrap();
        assert_eq!(config.min_pwm, 5);
        assert_eq!(config.max_pwm, 255);
        assert!(config.current_high);
    }
}
