//! Button presses, learn mode and brightness ramps

use std::collections::BTreeSet;

use led_protocol::DeviceEvent;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{batch_pwm_updates, LedManager, PwmUpdates};
use crate::button::{ButtonAction, ButtonTiming, RampDirection};
use crate::tasks::{StopSignal, TaskHandle};

impl LedManager {
    fn button_timing(&self) -> ButtonTiming {
        ButtonTiming {
            double_press_window: self.inner.config.double_press_window(),
            hold_threshold: self.inner.config.hold_threshold(),
        }
    }

    /// React to a switch panel report carried in a CAN frame
    pub(super) async fn handle_button_event(&self, controller_id: &str, event: &DeviceEvent) {
        let Some(report) = event.button_report() else {
            return;
        };
        let observation = {
            let mut state = self.inner.state.lock().await;
            state.buttons.observe(report, Instant::now(), self.button_timing())
        };

        if !observation.learned.is_empty() {
            let mut registry = self.inner.registry.lock().await;
            for bit in &observation.learned {
                registry.record_learned_switch(Some(controller_id), report.switch, *bit);
            }
            if let Err(e) = registry.commit() {
                debug!("Failed to persist learned buttons: {}", e);
            }
        }

        for action in observation.actions {
            match action {
                ButtonAction::Toggle { key, group_id } => {
                    debug!("Button {:?} toggles group {}", key, group_id);
                    self.toggle_group(&group_id).await;
                }
                ButtonAction::Reverse { key, direction } => {
                    debug!("Button {:?} ramp direction now {:?}", key, direction);
                }
                ButtonAction::Release { key } => {
                    let ramp = self.inner.state.lock().await.ramps.remove(&key);
                    if let Some(ramp) = ramp {
                        ramp.cancel().await;
                        debug!("Stopped ramp for button {:?}", key);
                    }
                }
                ButtonAction::Hold {
                    key,
                    group_id,
                    direction,
                } => {
                    let mut state = self.inner.state.lock().await;
                    if state.ramps.get(&key).is_some_and(|ramp| !ramp.is_finished()) {
                        continue;
                    }
                    debug!("Button {:?} ramping group {} {:?}", key, group_id, direction);
                    let manager = self.clone();
                    let ramp = TaskHandle::spawn(move |stop| manager.run_ramp(group_id, direction, stop));
                    state.ramps.insert(key, ramp);
                }
            }
        }
    }

    async fn toggle_group(&self, group_id: &str) {
        let is_on = {
            let registry = self.inner.registry.lock().await;
            match registry.group(group_id) {
                Some(group) => group.is_on,
                None => {
                    debug!("Button bound to missing group {}", group_id);
                    return;
                }
            }
        };
        if let Err(e) = self.apply_group_action(group_id, !is_on).await {
            debug!("Button toggle of group {} failed: {}", group_id, e);
        }
    }

    async fn run_ramp(self, group_id: String, direction: RampDirection, mut stop: StopSignal) {
        self.ensure_group_on(&group_id).await;
        let interval = self.inner.config.ramp_step_interval();
        loop {
            if !self.step_group_pwm(&group_id, direction).await {
                debug!("Ramp for group {} reached its limit", group_id);
                break;
            }
            tokio::select! {
                _ = stop.stopped() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn ensure_group_on(&self, group_id: &str) {
        let is_on = {
            let registry = self.inner.registry.lock().await;
            registry.group(group_id).is_some_and(|group| group.is_on)
        };
        if is_on {
            return;
        }
        if let Err(e) = self.apply_group_action(group_id, true).await {
            debug!("Could not switch group {} on before ramping: {}", group_id, e);
        }
    }

    /// Nudge every enabled member one step in `direction`
    ///
    /// Returns false when no output changed or nothing is addressable.
    async fn step_group_pwm(&self, group_id: &str, direction: RampDirection) -> bool {
        let step = self.inner.config.ramp_step_size.max(1) * direction.sign();
        let mut registry = self.inner.registry.lock().await;
        let Some(group) = registry.group(group_id) else {
            return false;
        };

        let mut updates = PwmUpdates::new();
        let mut stepped = Vec::new();
        for (driver, output) in registry.resolve_output_ids(&group.led_ids) {
            if output.disabled || driver.controller_id.is_empty() {
                continue;
            }
            let next = output.clamp_pwm(output.pwm + step);
            if next == output.pwm {
                continue;
            }
            let channels = updates
                .entry(driver.controller_id.clone())
                .or_default()
                .entry(driver.driver_index)
                .or_default();
            for channel in output.addressed_channels() {
                channels.insert(channel, next);
            }
            stepped.push((output.id.clone(), next));
        }
        if stepped.is_empty() {
            return false;
        }

        self.dispatch_ambient(&mut registry, batch_pwm_updates(&updates));
        let mut changed = BTreeSet::new();
        for (output_id, pwm) in stepped {
            if let Some(output) = registry.output_mut(&output_id) {
                output.pwm = pwm;
                output.target_pwm = pwm;
                output.level = i64::from(pwm > output.min_pwm);
                changed.insert(output_id);
            }
        }
        let flipped = registry.refresh_group_states(&changed);
        if let Err(e) = registry.commit() {
            warn!("Ramp step for group {} not persisted: {}", group_id, e);
        }
        self.broadcast_groups(&registry, &flipped);
        true
    }
}
