//! Outbound command envelopes
//!
//! Every command is one JSON object on one line, discriminated by `cm` and,
//! for LED and CAN commands, by the action key `a`.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Number of channel slots on one driver chip
pub const CHANNELS_PER_DRIVER: usize = 4;

/// Slot value the firmware skips in an `on` array
pub const UNADDRESSED: i64 = -1;

/// Channels addressed on one driver
///
/// For `on` commands `channels` is a full 4-slot array of PWM values (with
/// [`UNADDRESSED`] for untouched slots). For `off` and `pwm` commands it is
/// a sorted list of channel indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverChannels {
    #[serde(rename = "drv")]
    pub driver: i64,
    #[serde(rename = "cs")]
    pub channels: Vec<i64>,
}

impl DriverChannels {
    pub fn new(driver: i64, channels: Vec<i64>) -> Self {
        Self { driver, channels }
    }
}

/// Actions understood by the LED subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "a", rename_all = "lowercase")]
pub enum LedAction {
    /// Light channels at per-slot PWM values
    On { drvs: Vec<DriverChannels> },
    /// Switch channels off
    Off { drvs: Vec<DriverChannels> },
    /// Set every listed channel to one PWM value
    Pwm { drvs: Vec<DriverChannels>, pwm: i64 },
    /// Configure a channel's PWM range and current mode
    Cfg {
        #[serde(rename = "dvr")]
        driver: i64,
        #[serde(rename = "c")]
        channel: i64,
        #[serde(rename = "mip")]
        min_pwm: i64,
        #[serde(rename = "mp")]
        max_pwm: i64,
        #[serde(rename = "ch")]
        current_high: bool,
    },
}

/// Actions understood by the CAN bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "a", rename_all = "lowercase")]
pub enum CanAction {
    /// Transmit one frame
    Send {
        /// Sender identifier
        i: String,
        /// Frame payload bytes
        d: Vec<u8>,
    },
}

/// A command sent to a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cm", rename_all = "lowercase")]
pub enum Command {
    Led(LedAction),
    Can(CanAction),
    /// Request a status snapshot
    Status,
}

impl Command {
    pub fn led_on(drvs: Vec<DriverChannels>) -> Self {
        Command::Led(LedAction::On { drvs })
    }

    pub fn led_off(drvs: Vec<DriverChannels>) -> Self {
        Command::Led(LedAction::Off { drvs })
    }

    pub fn led_pwm(drvs: Vec<DriverChannels>, pwm: i64) -> Self {
        Command::Led(LedAction::Pwm { drvs, pwm })
    }

    pub fn can_send(sender: impl Into<String>, data: Vec<u8>) -> Self {
        Command::Can(CanAction::Send {
            i: sender.into(),
            d: data,
        })
    }

    /// Serialize to a compact single-line JSON object (no terminator)
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to a JSON value, for diagnostic logs
    pub fn to_value(&self) -> Result<serde_json::Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_request() {
        assert_eq!(Command::Status.to_line().unwrap(), r#"{"cm":"status"}"#);
    }

    #[test]
    fn test_on_carries_four_slots() {
        let cmd = Command::led_on(vec![DriverChannels::new(1, vec![127, -1, 105, -1])]);
        assert_eq!(
            cmd.to_line().unwrap(),
            r#"{"cm":"led","a":"on","drvs":[{"drv":1,"cs":[127,-1,105,-1]}]}"#
        );
    }

    #[test]
    fn test_pwm_batch() {
        let cmd = Command::led_pwm(
            vec![DriverChannels::new(0, vec![0, 3]), DriverChannels::new(2, vec![1])],
            64,
        );
        assert_eq!(
            cmd.to_line().unwrap(),
            r#"{"cm":"led","a":"pwm","drvs":[{"drv":0,"cs":[0,3]},{"drv":2,"cs":[1]}],"pwm":64}"#
        );
    }

    #[test]
    fn test_cfg_short_keys() {
        let cmd = Command::Led(LedAction::Cfg {
            driver: 1,
            channel: 2,
            min_pwm: 5,
            max_pwm: 200,
            current_high: true,
        });
        assert_eq!(
            cmd.to_line().unwrap(),
            r#"{"cm":"led","a":"cfg","dvr":1,"c":2,"mip":5,"mp":200,"ch":true}"#
        );
    }

    #[test]
    fn test_can_send() {
        let cmd = Command::can_send("12", vec![0x20, 0, 3, 0, 4, 0x33, 0x22, 0x11]);
        assert_eq!(
            cmd.to_line().unwrap(),
            r#"{"cm":"can","a":"send","i":"12","d":[32,0,3,0,4,51,34,17]}"#
        );
    }

    #[test]
    fn test_commands_parse_back() {
        let line = r#"{"cm":"led","a":"off","drvs":[{"drv":0,"cs":[2]}]}"#;
        let cmd: Command = serde_json::from_str(line).unwrap();
        assert_eq!(cmd, Command::led_off(vec![DriverChannels::new(0, vec![2])]));
        let cmd: Command = serde_json::from_str(r#"{"cm":"status"}"#).unwrap();
        assert_eq!(cmd, Command::Status);
    }
}
