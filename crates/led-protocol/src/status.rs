//! Inbound status snapshots
//!
//! A status line carries whole-board telemetry (uptime, fan, current-sense
//! buses) plus per-driver and per-channel confirmation of what the hardware
//! is actually doing. Sensor readings come Kalman-filtered; only the filtered
//! value (`k`/`kalman`) is kept.

use serde::{Deserialize, Serialize};

use crate::fields::Fields;

/// Cooling fan telemetry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FanStatus {
    pub ready: Option<bool>,
    pub count: Option<i64>,
    pub rpm: Option<f64>,
    pub fault: Option<bool>,
}

/// One current-sense bus reading
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorReading {
    /// Bus label, `"Bus {index}"` when the board does not name it
    pub bus: String,
    pub index: Option<i64>,
    pub ready: bool,
    /// Whether the sample is trustworthy enough to aggregate
    pub valid: bool,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    /// Board time of the sample
    pub updated_ms: Option<i64>,
}

/// Driver chip health flags
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverStatus {
    pub available: Option<bool>,
    pub indicator: Option<bool>,
    pub wire: Option<String>,
}

/// Confirmed state of one driver slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelReport {
    pub slot: i64,
    pub level: i64,
    pub pwm: i64,
    /// Set when the board reports a fault, an error or over-current
    pub fault: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriverReport {
    pub index: i64,
    pub status: DriverStatus,
    pub channels: Vec<ChannelReport>,
}

/// A decoded `{"t":"status"}` message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    pub uptime_ms: Option<i64>,
    pub drivers_reported: Option<i64>,
    pub device_name: Option<String>,
    pub fan: Option<FanStatus>,
    pub sensors: Vec<SensorReading>,
    pub drivers: Vec<DriverReport>,
}

impl StatusReport {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Self {
        let sensors = fields
            .object(&["ac", "acs"])
            .map(|acs| {
                acs.array(&["sns", "sensors"])
                    .iter()
                    .filter_map(Fields::of)
                    .map(|sensor| sensor_reading(&sensor))
                    .collect()
            })
            .unwrap_or_default();

        let drivers = fields
            .object(&["l", "led"])
            .map(|led| {
                led.array(&["drvs", "drivers"])
                    .iter()
                    .filter_map(Fields::of)
                    .filter_map(|driver| driver_report(&driver))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            uptime_ms: fields.int(&["um", "uptime_ms"]),
            drivers_reported: fields.int(&["drvs", "drivers"]),
            device_name: fields.text(&["dv", "device_name"]),
            fan: fields.object(&["f", "fan"]).map(|fan| FanStatus {
                ready: fan.flag(&["rd", "ready"]),
                count: fan.int(&["cn", "count"]),
                rpm: fan.float(&["rpm"]),
                fault: fan.flag(&["flt", "fault"]),
            }),
            sensors,
            drivers,
        }
    }
}

fn kalman(block: Option<Fields<'_>>) -> Option<f64> {
    block?.float(&["k", "kalman"])
}

fn sensor_reading(sensor: &Fields<'_>) -> SensorReading {
    let index = sensor.int(&["idx", "index"]);
    let bus = sensor.text(&["bu", "bus"]).unwrap_or_else(|| match index {
        Some(i) => format!("Bus {i}"),
        None => "Bus ?".to_string(),
    });
    let sample = sensor.object(&["s", "sample"]);

    SensorReading {
        bus,
        index,
        ready: sensor.flag(&["rd", "ready"]).unwrap_or(false),
        valid: sample
            .and_then(|s| s.flag(&["vd", "valid"]))
            .unwrap_or(false),
        voltage: kalman(sample.and_then(|s| s.object(&["vlt", "voltage"]))),
        current: kalman(sample.and_then(|s| s.object(&["cu", "current"]))),
        power: kalman(sample.and_then(|s| s.object(&["pw", "power"]))),
        updated_ms: sample.and_then(|s| s.int(&["um", "updated_ms"])),
    }
}

fn driver_report(driver: &Fields<'_>) -> Option<DriverReport> {
    let index = driver.int(&["idx", "index"])?;
    let channels = driver
        .array(&["cs", "channels"])
        .iter()
        .filter_map(Fields::of)
        .filter_map(|channel| {
            let slot = channel.int(&["idx", "index"])?;
            let level = match channel.flag(&["on"]) {
                Some(on) => i64::from(on),
                None => {
                    let state = channel
                        .text(&["sa", "state"])
                        .map(|s| s.to_ascii_lowercase())
                        .unwrap_or_default();
                    i64::from(matches!(state.as_str(), "on" | "true" | "1"))
                }
            };
            let fault_keys: [&[&str]; 3] =
                [&["flt", "fault"], &["er", "errored"], &["ch", "current_high"]];
            let fault = fault_keys
                .iter()
                .any(|keys| channel.flag(keys).unwrap_or(false));
            Some(ChannelReport {
                slot,
                level,
                pwm: channel.int(&["pwm"]).unwrap_or(0),
                fault,
            })
        })
        .collect();

    Some(DriverReport {
        index,
        status: DriverStatus {
            available: driver.flag(&["av", "available"]),
            indicator: driver.flag(&["idc", "indicator"]),
            wire: driver.text(&["w", "wire"]),
        },
        channels,
    })
}
