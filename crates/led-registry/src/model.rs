//! Typed registry records
//!
//! Entities live in flat maps keyed by stable identifiers. Children carry
//! their parent's id (`Output::driver_id`, `Driver::controller_id`,
//! `Button::switch_id`) instead of being nested inside it.

use std::collections::{BTreeMap, VecDeque};

use led_protocol::{DriverStatus, FanStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output slots per driver chip
pub const OUTPUTS_PER_DRIVER: usize = 4;
/// Default serial link speed
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Highest PWM value a channel accepts
pub const DEFAULT_MAX_PWM: i64 = 255;
/// Upper bound for a switch panel's button count
pub const MAX_BUTTONS_PER_SWITCH: u8 = 5;
/// Number of SSR entries that can be configured
pub const SSR_MAX_ENTRIES: usize = 10;
/// Number of addressable SSR relay bits
pub const SSR_MAX_BITS: u8 = 10;
/// Fixed port count of the patch panel
pub const PATCH_PANEL_PORTS: u8 = 48;
/// Cap for per-controller rolling logs and sensor histories
pub const HISTORY_LIMIT: usize = 200;

// ============================================================================
// Controllers
// ============================================================================

/// A physical controller board reachable over one serial link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub id: String,
    pub name: String,
    /// Serial port path; `None` leaves the controller unconnected
    pub port: Option<String>,
    pub baudrate: u32,
    #[serde(default)]
    pub polling_enabled: bool,
    /// At most one controller in the fleet bridges the CAN bus
    #[serde(default)]
    pub has_can_interface: bool,
    /// Sender id used for frames sent over the CAN bridge
    #[serde(default)]
    pub can_sender_id: Option<String>,
    #[serde(default)]
    pub metadata: ControllerMetadata,
}

/// Derived controller state, overwritten from status snapshots
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerMetadata {
    pub status: Option<ControllerStatus>,
    /// Valid sensor samples per bus, oldest first
    pub acs_history: BTreeMap<String, Vec<SensorSample>>,
    /// Recent TX/RX payloads, oldest first
    pub serial_log: VecDeque<SerialLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub uptime_ms: Option<i64>,
    pub drivers_reported: Option<i64>,
    pub device_name: Option<String>,
    pub fan: Option<FanStatus>,
    pub acs: Vec<AcsSummary>,
    pub total_power: f64,
    pub total_current: f64,
    /// Mean of valid voltage samples, `None` when there were none
    pub total_voltage: Option<f64>,
    pub voltage_sample_count: u32,
}

/// Latest reading of one current-sense bus
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AcsSummary {
    pub bus: String,
    pub index: Option<i64>,
    pub ready: bool,
    pub valid: bool,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp_ms: Option<i64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialLogEntry {
    /// Wall-clock milliseconds since the Unix epoch
    pub timestamp: i64,
    pub direction: Direction,
    pub payload: Value,
}

// ============================================================================
// Drivers and outputs
// ============================================================================

/// One PWM driver chip on a controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub controller_id: String,
    pub driver_index: i64,
    /// Output ids ordered by slot; always [`OUTPUTS_PER_DRIVER`] long
    pub outputs: Vec<String>,
    #[serde(default)]
    pub status: Option<DriverStatus>,
}

/// One LED output slot of a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub id: String,
    pub driver_id: String,
    pub slot: usize,
    pub name: String,
    /// Physical channels driven by this slot, sorted and unique
    pub channels: Vec<i64>,
    pub disabled: bool,
    pub faulty: bool,
    pub pwm: i64,
    pub level: i64,
    pub min_pwm: i64,
    pub max_pwm: i64,
    /// PWM the output returns to when switched on individually
    pub target_pwm: i64,
}

impl Output {
    /// Effective `[min, max]` range; an inverted range collapses onto `min`
    pub fn pwm_range(&self) -> (i64, i64) {
        (self.min_pwm, self.max_pwm.max(self.min_pwm))
    }

    pub fn clamp_pwm(&self, pwm: i64) -> i64 {
        let (min, max) = self.pwm_range();
        pwm.clamp(min, max)
    }

    /// Channels this output drives, falling back to its slot index
    pub fn addressed_channels(&self) -> Vec<i64> {
        if self.channels.is_empty() {
            vec![self.slot as i64]
        } else {
            self.channels.clone()
        }
    }

    pub fn is_lit(&self) -> bool {
        self.level > 0
    }

    /// Lit or faulted; a faulted output does not hold its groups off
    pub fn is_accounted_for(&self) -> bool {
        self.is_lit() || self.faulty
    }
}

// ============================================================================
// Groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub led_ids: Vec<String>,
    /// Derived: every enabled member is lit or faulted
    pub is_on: bool,
    /// Percentage, 0..=100
    pub brightness: i64,
}

// ============================================================================
// Switches and buttons
// ============================================================================

/// A momentary-button panel on the CAN bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    pub id: String,
    pub name: String,
    /// Hardware address reported in CAN frames
    pub switch: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub button_count: u8,
    pub has_buzzer: bool,
    pub flash_leds: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub name: String,
    pub switch_id: String,
    /// Hardware address copied from the parent switch
    pub switch: i64,
    /// Single-bit mask within the switch's status word
    pub mask: i64,
    pub group_id: Option<String>,
}

/// A button bit seen on the bus but not yet mapped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedButton {
    /// `"{switch}:{mask}"`
    pub id: String,
    pub controller_id: Option<String>,
    pub switch: i64,
    pub mask: i64,
    pub count: u32,
    pub first_seen: i64,
    pub last_seen: i64,
}

impl LearnedButton {
    pub fn key(switch: i64, mask: i64) -> String {
        format!("{switch}:{mask}")
    }
}

// ============================================================================
// Peripherals
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrConfig {
    /// CAN base address of the relay board; 0 means unconfigured
    pub base_address: u8,
    pub entries: BTreeMap<String, SsrEntry>,
}

/// A solid-state relay driven by one bit of the relay board's mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsrEntry {
    pub id: String,
    pub name: String,
    pub bit_index: u8,
    pub group_id: Option<String>,
    pub is_on: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPanelPort {
    pub id: String,
    pub port_number: u8,
    pub label: String,
    pub notes: String,
    pub led_ids: Vec<String>,
}

impl PatchPanelPort {
    pub fn unlabeled(port_number: u8) -> Self {
        Self {
            id: port_number.to_string(),
            port_number,
            label: format!("Port {port_number}"),
            notes: String::new(),
            led_ids: Vec::new(),
        }
    }
}

/// Everything the registry persists
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryData {
    pub controllers: BTreeMap<String, Controller>,
    pub drivers: BTreeMap<String, Driver>,
    pub outputs: BTreeMap<String, Output>,
    pub groups: BTreeMap<String, Group>,
    pub switches: BTreeMap<String, Switch>,
    pub buttons: BTreeMap<String, Button>,
    pub learned_buttons: BTreeMap<String, LearnedButton>,
    pub ssr: SsrConfig,
    /// Only ports that were edited; keyed by port number
    pub patch_panel: BTreeMap<String, PatchPanelPort>,
}

// ============================================================================
// Upsert payloads
// ============================================================================

// Absent fields keep the stored value on update and take the default on
// insert. A missing `id` creates a new record with a generated id.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Empty string clears the port
    pub port: Option<String>,
    pub baudrate: Option<u32>,
    pub polling_enabled: Option<bool>,
    #[serde(alias = "can_interface")]
    pub has_can_interface: Option<bool>,
    pub can_sender_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub controller_id: Option<String>,
    pub driver_index: Option<i64>,
    pub outputs: Vec<OutputSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    pub id: Option<String>,
    /// Defaults to the position in [`DriverSpec::outputs`]
    pub slot: Option<usize>,
    pub name: Option<String>,
    pub channels: Option<Vec<i64>>,
    pub disabled: Option<bool>,
    pub faulty: Option<bool>,
    pub pwm: Option<i64>,
    pub level: Option<i64>,
    pub min_pwm: Option<i64>,
    pub max_pwm: Option<i64>,
    pub target_pwm: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub led_ids: Option<Vec<String>>,
    pub is_on: Option<bool>,
    pub brightness: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub switch: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub button_count: Option<i64>,
    pub has_buzzer: Option<bool>,
    pub flash_leds: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub switch_id: Option<String>,
    /// Hardware address, used when `switch_id` does not resolve
    pub switch: Option<i64>,
    pub mask: i64,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrEntrySpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub bit_index: i64,
    pub group_id: Option<String>,
    pub is_on: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchPanelPortSpec {
    pub port_number: i64,
    pub label: Option<String>,
    pub notes: Option<String>,
    pub led_ids: Option<Vec<String>>,
}
