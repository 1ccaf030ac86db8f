//! Runtime timing and sizing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the manager, its transports and its dispatch loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Interval between `{"cm":"status"}` polls (ms)
    pub poll_interval_ms: u64,
    /// A press this soon after a release is a double press (ms)
    pub double_press_window_ms: u64,
    /// A button held this long starts ramping (ms)
    pub hold_threshold_ms: u64,
    /// Delay between ramp steps (ms)
    pub ramp_step_interval_ms: u64,
    /// PWM change per ramp step
    pub ramp_step_size: i64,
    /// Delay between reconnect attempts (ms)
    pub reconnect_delay_ms: u64,
    /// Bounded wait for one inbound line (ms)
    pub dequeue_timeout_ms: u64,
    /// Dequeue waits longer than this are logged (ms)
    pub slow_dequeue_ms: u64,
    /// Baud rate for controllers that do not set one
    pub default_baud_rate: u32,
    /// Capacity of the group state broadcast channel
    pub group_event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            double_press_window_ms: 500,
            hold_threshold_ms: 400,
            ramp_step_interval_ms: 300,
            ramp_step_size: 1,
            reconnect_delay_ms: 1000,
            dequeue_timeout_ms: 1000,
            slow_dequeue_ms: 250,
            default_baud_rate: 115_200,
            group_event_capacity: 64,
        }
    }
}

impl ManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn double_press_window(&self) -> Duration {
        Duration::from_millis(self.double_press_window_ms)
    }

    pub fn hold_threshold(&self) -> Duration {
        Duration::from_millis(self.hold_threshold_ms)
    }

    pub fn ramp_step_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_step_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn slow_dequeue(&self) -> Duration {
        Duration::from_millis(self.slow_dequeue_ms)
    }
}
