//! Group membership resolved to hardware addresses

use std::collections::BTreeMap;

use led_protocol::{CHANNELS_PER_DRIVER, UNADDRESSED};

use crate::model::{Driver, Output};
use crate::registry::Registry;

/// controller id → driver index → sorted channel indices
pub type ChannelMap = BTreeMap<String, BTreeMap<i64, Vec<i64>>>;

/// controller id → driver index → per-slot PWM (`-1` for untouched slots)
pub type PwmMap = BTreeMap<String, BTreeMap<i64, [i64; CHANNELS_PER_DRIVER]>>;

/// Which members to include when resolving a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapFilter {
    pub include_disabled: bool,
    pub include_faulty: bool,
}

impl MapFilter {
    /// Every enabled member, faulted or not
    pub const WITH_FAULTY: MapFilter = MapFilter {
        include_disabled: false,
        include_faulty: true,
    };

    fn admits(&self, output: &Output) -> bool {
        (self.include_disabled || !output.disabled) && (self.include_faulty || !output.faulty)
    }
}

/// PWM for `brightness` percent within an output's range, truncated
pub fn brightness_to_pwm(output: &Output, brightness: i64) -> i64 {
    let (min, max) = output.pwm_range();
    let fraction = brightness.clamp(0, 100) as f64 / 100.0;
    (min as f64 + (max - min) as f64 * fraction) as i64
}

impl Registry {
    fn group_members(&self, group_id: &str, filter: MapFilter) -> Vec<(&Driver, &Output)> {
        let Some(group) = self.group(group_id) else {
            return Vec::new();
        };
        self.resolve_output_ids(&group.led_ids)
            .into_iter()
            .filter(|(_, output)| filter.admits(output))
            .collect()
    }

    /// Channels to address when switching a group off
    pub fn build_group_channel_map(&self, group_id: &str, filter: MapFilter) -> ChannelMap {
        let mut map = ChannelMap::new();
        for (driver, output) in self.group_members(group_id, filter) {
            let channels = map
                .entry(driver.controller_id.clone())
                .or_default()
                .entry(driver.driver_index)
                .or_default();
            channels.extend(output.addressed_channels());
        }
        for drivers in map.values_mut() {
            for channels in drivers.values_mut() {
                channels.sort_unstable();
                channels.dedup();
            }
        }
        map
    }

    /// Per-slot PWM arrays for switching a group on
    ///
    /// Each output gets `min + (max - min) * brightness / 100` from its own
    /// range. Channels outside 0..4 are ignored. `brightness` defaults to
    /// the group's stored value.
    pub fn build_group_pwm_map(
        &self,
        group_id: &str,
        filter: MapFilter,
        brightness: Option<i64>,
    ) -> PwmMap {
        let Some(group) = self.group(group_id) else {
            return PwmMap::new();
        };
        let brightness = brightness.unwrap_or(group.brightness);

        let mut map = PwmMap::new();
        for (driver, output) in self.group_members(group_id, filter) {
            let pwm = brightness_to_pwm(output, brightness);
            let slots = map
                .entry(driver.controller_id.clone())
                .or_default()
                .entry(driver.driver_index)
                .or_insert([UNADDRESSED; CHANNELS_PER_DRIVER]);
            for channel in output.addressed_channels() {
                if let Some(slot) = usize::try_from(channel)
                    .ok()
                    .and_then(|c| slots.get_mut(c))
                {
                    *slot = pwm;
                }
            }
        }
        map
    }
}
