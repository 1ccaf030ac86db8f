//! Power and LED metrics derived from controller status

use serde::Serialize;

use crate::registry::Registry;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsTotals {
    pub power: f64,
    pub current: f64,
    /// Sample-weighted mean across controllers, 0 without samples
    pub voltage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerMetrics {
    pub id: String,
    pub name: String,
    pub power: f64,
    pub current: f64,
    pub voltage: Option<f64>,
    pub voltage_sample_count: u32,
    /// Enabled outputs only
    pub led_total: usize,
    pub led_on: usize,
    pub led_fault: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorMetrics {
    pub controller_id: String,
    pub controller_name: String,
    pub bus: String,
    pub index: Option<i64>,
    pub ready: bool,
    pub valid: bool,
    pub power: f64,
    pub current: f64,
    pub voltage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub totals: MetricsTotals,
    pub controllers: Vec<ControllerMetrics>,
    pub sensors: Vec<SensorMetrics>,
}

impl MetricsSnapshot {
    pub fn from_registry(registry: &Registry) -> Self {
        let mut snapshot = MetricsSnapshot::default();
        let mut weighted_voltage = 0.0;
        let mut voltage_samples = 0u32;

        for controller in registry.controllers() {
            let status = controller.metadata.status.as_ref();

            let (mut led_total, mut led_on, mut led_fault) = (0, 0, 0);
            for driver in registry.drivers().filter(|d| d.controller_id == controller.id) {
                for output in registry.driver_outputs(driver).filter(|o| !o.disabled) {
                    led_total += 1;
                    if output.is_lit() {
                        led_on += 1;
                    }
                    if output.faulty {
                        led_fault += 1;
                    }
                }
            }

            let power = status.map_or(0.0, |s| s.total_power);
            let current = status.map_or(0.0, |s| s.total_current);
            let voltage = status.and_then(|s| s.total_voltage);
            let sample_count = status.map_or(0, |s| s.voltage_sample_count);

            snapshot.totals.power += power;
            snapshot.totals.current += current;
            if let Some(v) = voltage {
                if sample_count > 0 {
                    weighted_voltage += v * f64::from(sample_count);
                    voltage_samples += sample_count;
                }
            }

            snapshot.controllers.push(ControllerMetrics {
                id: controller.id.clone(),
                name: controller.name.clone(),
                power,
                current,
                voltage,
                voltage_sample_count: sample_count,
                led_total,
                led_on,
                led_fault,
            });

            for acs in status.map(|s| s.acs.as_slice()).unwrap_or_default() {
                snapshot.sensors.push(SensorMetrics {
                    controller_id: controller.id.clone(),
                    controller_name: controller.name.clone(),
                    bus: acs.bus.clone(),
                    index: acs.index,
                    ready: acs.ready,
                    valid: acs.valid,
                    power: acs.power.unwrap_or(0.0),
                    current: acs.current.unwrap_or(0.0),
                    voltage: acs.voltage.unwrap_or(0.0),
                });
            }
        }

        if voltage_samples > 0 {
            snapshot.totals.voltage = weighted_voltage / f64::from(voltage_samples);
        }
        snapshot
    }
}
