//! Periodic status polling

use led_protocol::Command;
use led_registry::Direction;
use tracing::{debug, info};

use super::{stop_poll, LedManager, ManagerState};
use crate::tasks::{StopSignal, TaskHandle};

impl LedManager {
    /// Start or stop the poll loop for one controller
    pub(super) async fn apply_polling(&self, state: &mut ManagerState, controller_id: &str, enabled: bool) {
        if !enabled {
            if state.polls.contains_key(controller_id) {
                stop_poll(state, controller_id).await;
                info!("Stopped status polling for {}", controller_id);
            }
            return;
        }
        if state.closed {
            return;
        }
        if state.polls.get(controller_id).is_some_and(|poll| !poll.is_finished()) {
            return;
        }

        let manager = self.clone();
        let id = controller_id.to_string();
        let poll = TaskHandle::spawn(move |stop| manager.poll_loop(id, stop));
        state.polls.insert(controller_id.to_string(), poll);
        info!("Started status polling for {}", controller_id);
    }

    async fn poll_loop(self, controller_id: String, mut stop: StopSignal) {
        let interval = self.inner.config.poll_interval();
        loop {
            self.poll_once(&controller_id).await;
            tokio::select! {
                _ = stop.stopped() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("Poll loop for {} stopped", controller_id);
    }

    async fn poll_once(&self, controller_id: &str) {
        let connected = self
            .inner
            .mux
            .transport(controller_id)
            .is_some_and(|transport| transport.is_connected());
        if !connected {
            debug!("Skipping status poll for disconnected {}", controller_id);
            return;
        }

        let command = Command::Status;
        if let Ok(payload) = command.to_value() {
            let mut registry = self.inner.registry.lock().await;
            registry.append_serial_log(controller_id, Direction::Tx, payload);
        }
        if let Err(e) = self.inner.mux.send(controller_id, &command) {
            debug!("Status poll for {} failed: {}", controller_id, e);
        }
    }
}
