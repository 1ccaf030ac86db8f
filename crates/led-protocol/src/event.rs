//! Inbound event notifications

use serde_json::Value;

use crate::fields::{as_int, Fields};

/// Event names emitted by controller firmware
pub mod events {
    pub const LED_ENABLE: &str = "led.enable";
    pub const LED_DISABLE: &str = "led.disable";
    pub const LED_CHANNEL_STATE: &str = "led.channel_state";
    pub const LED_FAULT: &str = "led.fault";
    pub const LED_FAULT_CLEARED: &str = "led.fault_cleared";
    pub const CAN_MESSAGE: &str = "can.message";
}

/// A decoded `{"t":"event"}` message with synonyms resolved
///
/// Addressing fields are kept separate: `driver_index` comes from
/// `dvr`/`driver`/`idx`, `slot` from `i`/`id`/`idx`. Firmware that only
/// sends `idx` therefore fills both.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceEvent {
    pub name: String,
    pub driver_index: Option<i64>,
    pub channel: Option<i64>,
    pub slot: Option<i64>,
    /// Lower-cased `sa`/`state` text
    pub state: Option<String>,
    pub level: Option<i64>,
    pub pwm: Option<i64>,
    pub on: Option<bool>,
    pub fault: Option<bool>,
    /// Raw CAN frame bytes (`d`/`data`)
    pub data: Vec<Value>,
}

/// Switch panel report carried in a CAN frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonReport {
    /// Hardware address of the switch panel
    pub switch: i64,
    /// Bitmask of buttons currently held down
    pub mask: i64,
}

impl DeviceEvent {
    pub(crate) fn from_fields(name: &str, fields: &Fields<'_>) -> Self {
        Self {
            name: name.to_string(),
            driver_index: fields.int(&["dvr", "driver", "idx"]),
            channel: fields.int(&["c", "channel"]),
            slot: fields.int(&["i", "id", "idx"]),
            state: fields
                .text(&["sa", "state"])
                .map(|s| s.to_ascii_lowercase()),
            level: fields.int(&["level"]),
            pwm: fields.int(&["pwm"]),
            on: fields.flag(&["on"]),
            fault: fields.flag(&["flt", "fault"]),
            data: fields.array(&["d", "data"]).to_vec(),
        }
    }

    /// On/off level implied by the event
    ///
    /// An explicit `level` wins, then the `on` flag, then the state text.
    pub fn resolved_level(&self) -> Option<i64> {
        if let Some(level) = self.level {
            return Some(level);
        }
        if let Some(on) = self.on {
            return Some(i64::from(on));
        }
        self.state
            .as_deref()
            .map(|state| i64::from(matches!(state, "on" | "true" | "1")))
    }

    /// Switch panel report, if this is a CAN frame with at least six bytes
    pub fn button_report(&self) -> Option<ButtonReport> {
        if self.data.len() < 6 {
            return None;
        }
        Some(ButtonReport {
            switch: as_int(&self.data[0])?,
            mask: as_int(&self.data[5])?,
        })
    }
}
