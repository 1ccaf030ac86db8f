//! Virtual controller board
//!
//! Applies decoded commands to a set of simulated driver channels and queues
//! the lines the real firmware would answer with.

use std::collections::{BTreeMap, VecDeque};

use led_protocol::{CanAction, Command, DriverChannels, LedAction, CHANNELS_PER_DRIVER};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Simulated state of one driver channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelState {
    pub level: i64,
    pub pwm: i64,
    pub fault: bool,
    pub min_pwm: i64,
    pub max_pwm: i64,
}

/// Configuration for creating a virtual controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualControllerConfig {
    /// Reported as the device name in status snapshots
    pub id: String,
    /// Number of driver chips on the board
    pub drivers: usize,
    /// Answer LED commands with `led.channel_state` events
    pub emit_channel_events: bool,
    /// Bus voltage reported by the current sensor
    pub bus_voltage: f64,
}

impl Default for VirtualControllerConfig {
    fn default() -> Self {
        Self {
            id: "Virtual Controller".to_string(),
            drivers: 1,
            emit_channel_events: true,
            bus_voltage: 12.0,
        }
    }
}

/// A simulated controller board
#[derive(Debug)]
pub struct VirtualController {
    config: VirtualControllerConfig,
    channels: BTreeMap<(i64, i64), ChannelState>,
    uptime_ms: i64,
    received: Vec<Command>,
    can_frames: Vec<(String, Vec<u8>)>,
    pending_output: VecDeque<String>,
}

impl VirtualController {
    pub fn new(id: impl Into<String>, drivers: usize) -> Self {
        Self::from_config(VirtualControllerConfig {
            id: id.into(),
            drivers,
            ..Default::default()
        })
    }

    pub fn from_config(config: VirtualControllerConfig) -> Self {
        let mut channels = BTreeMap::new();
        for driver in 0..config.drivers as i64 {
            for channel in 0..CHANNELS_PER_DRIVER as i64 {
                channels.insert(
                    (driver, channel),
                    ChannelState {
                        max_pwm: 255,
                        ..Default::default()
                    },
                );
            }
        }
        Self {
            config,
            channels,
            uptime_ms: 0,
            received: Vec::new(),
            can_frames: Vec::new(),
            pending_output: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// State of one channel; unknown channels read as dark
    pub fn channel(&self, driver: i64, channel: i64) -> ChannelState {
        self.channels
            .get(&(driver, channel))
            .copied()
            .unwrap_or_default()
    }

    /// Every command decoded so far, in arrival order
    pub fn received(&self) -> &[Command] {
        &self.received
    }

    /// CAN frames forwarded to the bus, as `(sender, data)`
    pub fn can_frames(&self) -> &[(String, Vec<u8>)] {
        &self.can_frames
    }

    pub fn advance(&mut self, elapsed_ms: i64) {
        self.uptime_ms += elapsed_ms;
    }

    /// Next line to send back, without terminator
    pub fn take_output(&mut self) -> Option<String> {
        self.pending_output.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    /// Decode and apply one command line
    ///
    /// Lines that are not commands are logged and ignored.
    pub fn process_line(&mut self, line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let command: Command = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Virtual controller {} ignoring {:?}: {}", self.config.id, line, e);
                return None;
            }
        };
        debug!("Virtual controller {} received {:?}", self.config.id, command);
        self.apply(&command);
        self.received.push(command.clone());
        Some(command)
    }

    fn apply(&mut self, command: &Command) {
        match command {
            Command::Led(LedAction::On { drvs }) => {
                for DriverChannels { driver, channels } in drvs {
                    for (slot, &value) in channels.iter().enumerate() {
                        if value >= 0 {
                            self.set_channel(*driver, slot as i64, value);
                        }
                    }
                }
            }
            Command::Led(LedAction::Off { drvs }) => {
                for DriverChannels { driver, channels } in drvs {
                    for &channel in channels {
                        self.set_channel(*driver, channel, 0);
                    }
                }
            }
            Command::Led(LedAction::Pwm { drvs, pwm }) => {
                for DriverChannels { driver, channels } in drvs {
                    for &channel in channels {
                        self.set_channel(*driver, channel, *pwm);
                    }
                }
            }
            Command::Led(LedAction::Cfg {
                driver,
                channel,
                min_pwm,
                max_pwm,
                ..
            }) => match self.channels.get_mut(&(*driver, *channel)) {
                Some(state) => {
                    state.min_pwm = *min_pwm;
                    state.max_pwm = *max_pwm;
                }
                None => warn!("Cfg for unknown channel {}/{}", driver, channel),
            },
            Command::Can(CanAction::Send { i, d }) => {
                self.can_frames.push((i.clone(), d.clone()));
            }
            Command::Status => {
                let status = self.status_line();
                self.pending_output.push_back(status);
            }
        }
    }

    fn set_channel(&mut self, driver: i64, channel: i64, pwm: i64) {
        let Some(state) = self.channels.get_mut(&(driver, channel)) else {
            warn!(
                "Virtual controller {} has no channel {}/{}",
                self.config.id, driver, channel
            );
            return;
        };
        state.pwm = pwm;
        state.level = i64::from(pwm > 0);
        let on = state.level > 0;
        if self.config.emit_channel_events {
            self.push(json!({
                "t": "event",
                "ev": "led.channel_state",
                "dvr": driver,
                "c": channel,
                "sa": if on { "on" } else { "off" },
                "pwm": pwm,
            }));
        }
    }

    /// Raise or clear a channel fault and report it
    pub fn set_fault(&mut self, driver: i64, channel: i64, fault: bool) {
        if let Some(state) = self.channels.get_mut(&(driver, channel)) {
            state.fault = fault;
        }
        let event = if fault { "led.fault" } else { "led.fault_cleared" };
        self.push(json!({"t": "event", "ev": event, "dvr": driver, "c": channel}));
    }

    /// Report a switch panel's pressed-button mask over CAN
    pub fn report_buttons(&mut self, switch: i64, mask: i64) {
        self.push(json!({
            "t": "event",
            "ev": "can.message",
            "d": [switch, 0, 0, 0, 0, mask, 0, 0],
        }));
    }

    /// Queue an arbitrary raw line
    pub fn emit_raw(&mut self, line: impl Into<String>) {
        self.pending_output.push_back(line.into());
    }

    /// Status snapshot in the firmware's abbreviated format
    pub fn status_line(&self) -> String {
        let lit_pwm: i64 = self.channels.values().map(|c| c.pwm.max(0)).sum();
        let current = lit_pwm as f64 / 255.0 * 0.1;
        let voltage = self.config.bus_voltage;

        let drivers: Vec<Value> = (0..self.config.drivers as i64)
            .map(|driver| {
                let channels: Vec<Value> = (0..CHANNELS_PER_DRIVER as i64)
                    .map(|channel| {
                        let state = self.channel(driver, channel);
                        json!({
                            "idx": channel,
                            "on": state.level > 0,
                            "pwm": state.pwm,
                            "flt": state.fault,
                        })
                    })
                    .collect();
                json!({"idx": driver, "av": true, "cs": channels})
            })
            .collect();

        json!({
            "t": "status",
            "um": self.uptime_ms,
            "dv": self.config.id,
            "drvs": self.config.drivers,
            "f": {"rd": true, "cn": 1, "rpm": 1200, "flt": false},
            "ac": {"sns": [{
                "bu": "main",
                "idx": 0,
                "rd": true,
                "s": {
                    "vd": true,
                    "um": self.uptime_ms,
                    "vlt": {"k": voltage},
                    "cu": {"k": current},
                    "pw": {"k": voltage * current},
                },
            }]},
            "l": {"drvs": drivers},
        })
        .to_string()
    }

    fn push(&mut self, value: Value) {
        self.pending_output.push_back(value.to_string());
    }
}
