//! Command & state manager
//!
//! The [`LedManager`] owns the runtime side of a fleet: one [`Transport`]
//! per configured controller, the [`Multiplexer`] they are registered with,
//! poll loops, button interaction state and ramp tasks. The persisted model
//! lives in a shared [`Registry`] that the manager mutates and commits.
//!
//! # Event loop
//!
//! Inbound traffic is funnelled from the multiplexer into a single event
//! loop, which also picks up registry change notifications:
//!
//! ```text
//! Transport ──lines──> Multiplexer ──"*" listener──> event queue ──> event loop
//!                                                                      │
//! Registry::commit ──listener──> sync requests ─────────────────────> │
//!                                                                      ▼
//!                                        handle_inbound / sync_clients
//! ```
//!
//! # Locking
//!
//! The registry lock is always taken before the manager state lock, and
//! neither is held across a call that could need the other in reverse.

mod buttons;
mod commands;
mod inbound;
mod polling;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use led_protocol::InboundMessage;
use led_registry::{
    Controller, GroupStateView, ListenerId, MetricsSnapshot, Registry, RegistrySnapshot,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::button::{ButtonKey, ButtonTable};
use crate::config::ManagerConfig;
use crate::multiplexer::{ListenerResult, Multiplexer, ANY_ROUTE};
use crate::tasks::{lock, StopSignal, TaskHandle};
use crate::transport::Transport;

pub use commands::{batch_pwm_updates, LedChannelConfig, PwmUpdates, SsrDispatch};

/// Registry handle shared between the manager and its callers
pub type SharedRegistry = Arc<AsyncMutex<Registry>>;

/// Callback run with the controller list after every reconciliation pass
pub type ControllerListener = Arc<dyn Fn(&[Controller]) + Send + Sync>;

/// Published whenever a group's derived state or brightness changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStateEvent {
    pub group_id: String,
    pub is_on: bool,
    pub brightness: i64,
}

/// Live link state of one controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialStatus {
    pub is_open: bool,
    pub error: Option<String>,
}

/// Builds the transport for a controller's port
pub trait TransportFactory: Send + Sync + 'static {
    fn create(
        &self,
        controller_id: &str,
        port: &str,
        baud_rate: u32,
        reconnect_delay: Duration,
    ) -> Transport;
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransports;

impl TransportFactory for SerialTransports {
    fn create(
        &self,
        _controller_id: &str,
        port: &str,
        baud_rate: u32,
        reconnect_delay: Duration,
    ) -> Transport {
        Transport::serial(port, baud_rate, reconnect_delay)
    }
}

impl<F> TransportFactory for F
where
    F: Fn(&str, &str, u32, Duration) -> Transport + Send + Sync + 'static,
{
    fn create(
        &self,
        controller_id: &str,
        port: &str,
        baud_rate: u32,
        reconnect_delay: Duration,
    ) -> Transport {
        self(controller_id, port, baud_rate, reconnect_delay)
    }
}

#[derive(Default)]
struct ManagerState {
    transports: HashMap<String, Transport>,
    polls: HashMap<String, TaskHandle>,
    buttons: ButtonTable,
    ramps: HashMap<ButtonKey, TaskHandle>,
    /// Set by shutdown; nothing may be started afterwards
    closed: bool,
}

struct ManagerInner {
    registry: SharedRegistry,
    mux: Multiplexer,
    config: ManagerConfig,
    factory: Box<dyn TransportFactory>,
    state: AsyncMutex<ManagerState>,
    group_events: broadcast::Sender<GroupStateEvent>,
    controller_listeners: Mutex<Vec<ControllerListener>>,
    registry_listener: Mutex<Option<ListenerId>>,
    event_loop: Mutex<Option<TaskHandle>>,
}

/// Orchestrates transports, commands and state reconciliation
#[derive(Clone)]
pub struct LedManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for LedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedManager")
            .field("mux", &self.inner.mux)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl LedManager {
    /// Start a manager over real serial ports
    pub async fn start(registry: SharedRegistry, config: ManagerConfig) -> Self {
        Self::with_factory(registry, config, SerialTransports).await
    }

    /// Start a manager whose transports come from `factory`
    ///
    /// Subscribes to registry commits, starts the event loop and runs a first
    /// reconciliation pass before returning.
    pub async fn with_factory(
        registry: SharedRegistry,
        config: ManagerConfig,
        factory: impl TransportFactory,
    ) -> Self {
        let mux = Multiplexer::new(config.dequeue_timeout(), config.slow_dequeue());
        let (group_events, _) = broadcast::channel(config.group_event_capacity.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();

        mux.register_listener(
            ANY_ROUTE,
            Arc::new(move |name: &str, message: &InboundMessage| -> ListenerResult {
                event_tx
                    .send((name.to_string(), message.clone()))
                    .map_err(|_| "manager event loop has stopped".into())
            }),
        );

        let listener_id = registry.lock().await.add_listener(move || {
            let _ = sync_tx.send(());
        });

        let manager = Self {
            inner: Arc::new(ManagerInner {
                registry,
                mux,
                config,
                factory: Box::new(factory),
                state: AsyncMutex::new(ManagerState::default()),
                group_events,
                controller_listeners: Mutex::new(Vec::new()),
                registry_listener: Mutex::new(Some(listener_id)),
                event_loop: Mutex::new(None),
            }),
        };

        let looped = manager.clone();
        let handle = TaskHandle::spawn(move |stop| run_event_loop(looped, event_rx, sync_rx, stop));
        *lock(&manager.inner.event_loop) = Some(handle);

        manager.sync_clients().await;
        manager
    }

    pub fn registry(&self) -> SharedRegistry {
        self.inner.registry.clone()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.inner.mux
    }

    /// Receive group state changes as they are committed
    pub fn subscribe_group_events(&self) -> broadcast::Receiver<GroupStateEvent> {
        self.inner.group_events.subscribe()
    }

    pub fn add_controller_listener(&self, listener: impl Fn(&[Controller]) + Send + Sync + 'static) {
        lock(&self.inner.controller_listeners).push(Arc::new(listener));
    }

    pub async fn groups_state_view(&self) -> BTreeMap<String, GroupStateView> {
        self.inner.registry.lock().await.groups_state_view()
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_registry(&*self.inner.registry.lock().await)
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.inner.registry.lock().await.snapshot()
    }

    /// Reconcile live transports with the registry's controller list
    ///
    /// Transports for removed controllers or cleared ports are closed; a
    /// changed port or baud rate reopens the link. Connect failures are
    /// logged and left to the transport's reconnect loop.
    pub async fn sync_clients(&self) {
        let (controllers, buttons) = {
            let registry = self.inner.registry.lock().await;
            (
                registry.controllers().cloned().collect::<Vec<_>>(),
                registry.buttons().cloned().collect::<Vec<_>>(),
            )
        };
        let config = &self.inner.config;
        let mut state = self.inner.state.lock().await;
        if state.closed {
            debug!("Ignoring controller sync after shutdown");
            return;
        }

        let configured: BTreeSet<&str> = controllers.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = state
            .transports
            .keys()
            .filter(|id| !configured.contains(id.as_str()))
            .cloned()
            .collect();
        for controller_id in stale {
            self.drop_transport(&mut state, &controller_id).await;
            stop_poll(&mut state, &controller_id).await;
        }

        for controller in &controllers {
            let Some(port) = controller.port.as_deref().filter(|p| !p.is_empty()) else {
                if state.transports.contains_key(&controller.id) {
                    self.drop_transport(&mut state, &controller.id).await;
                    stop_poll(&mut state, &controller.id).await;
                }
                continue;
            };
            let baud_rate = match controller.baudrate {
                0 => config.default_baud_rate,
                rate => rate,
            };

            if let Some(existing) = state.transports.get(&controller.id) {
                if existing.port() == port && existing.baud_rate() == baud_rate {
                    continue;
                }
                self.drop_transport(&mut state, &controller.id).await;
            }

            let transport =
                self.inner
                    .factory
                    .create(&controller.id, port, baud_rate, config.reconnect_delay());
            match transport.connect() {
                Ok(()) => info!("Controller {} connected on {}", controller.id, port),
                Err(e) => warn!(
                    "Controller {} failed to connect on {}: {}",
                    controller.id, port, e
                ),
            }
            state.transports.insert(controller.id.clone(), transport.clone());
            self.inner.mux.register_transport(controller.id.clone(), transport);
        }

        for controller in &controllers {
            self.apply_polling(&mut state, &controller.id, controller.polling_enabled)
                .await;
        }

        let removed = state.buttons.sync(&buttons);
        for key in removed {
            if let Some(ramp) = state.ramps.remove(&key) {
                ramp.cancel().await;
            }
        }
        drop(state);

        let listeners = lock(&self.inner.controller_listeners).clone();
        for listener in listeners {
            listener(&controllers);
        }
    }

    async fn drop_transport(&self, state: &mut ManagerState, controller_id: &str) {
        self.inner.mux.unregister_transport(controller_id).await;
        if let Some(transport) = state.transports.remove(controller_id) {
            transport.close().await;
            debug!("Closed transport for controller {}", controller_id);
        }
    }

    /// Link state of every configured controller
    pub async fn controller_serial_status(&self) -> BTreeMap<String, SerialStatus> {
        let ids: Vec<String> = {
            let registry = self.inner.registry.lock().await;
            registry.controllers().map(|c| c.id.clone()).collect()
        };
        let state = self.inner.state.lock().await;
        ids.into_iter()
            .map(|id| {
                let transport = state.transports.get(&id);
                let status = SerialStatus {
                    is_open: transport.is_some_and(Transport::is_connected),
                    error: transport.and_then(Transport::last_error),
                };
                (id, status)
            })
            .collect()
    }

    /// Stop every background task and close every link
    ///
    /// The event loop is joined first so no queued sync can reopen links.
    /// Then dispatch loops go, then poll loops, then transports with their
    /// reconnect loops, then ramps. The manager is inert afterwards.
    pub async fn shutdown(&self) {
        let listener = lock(&self.inner.registry_listener).take();
        if let Some(id) = listener {
            self.inner.registry.lock().await.remove_listener(id);
        }
        let event_loop = lock(&self.inner.event_loop).take();
        if let Some(handle) = event_loop {
            handle.stop().await;
        }

        let mut state = self.inner.state.lock().await;
        state.closed = true;
        self.inner.mux.unregister_all().await;
        for (_, poll) in state.polls.drain() {
            poll.cancel().await;
        }
        for (_, transport) in state.transports.drain() {
            transport.close().await;
        }
        for (_, ramp) in state.ramps.drain() {
            ramp.cancel().await;
        }
        state.buttons.clear();
        drop(state);
        info!("LED manager stopped");
    }

    fn broadcast_groups(&self, registry: &Registry, group_ids: &BTreeSet<String>) {
        for group_id in group_ids {
            let Some(group) = registry.group(group_id) else {
                continue;
            };
            // No receivers is fine
            let _ = self.inner.group_events.send(GroupStateEvent {
                group_id: group.id.clone(),
                is_on: group.is_on,
                brightness: group.brightness,
            });
        }
    }
}

async fn stop_poll(state: &mut ManagerState, controller_id: &str) {
    if let Some(poll) = state.polls.remove(controller_id) {
        poll.stop().await;
    }
}

async fn run_event_loop(
    manager: LedManager,
    mut events: mpsc::UnboundedReceiver<(String, InboundMessage)>,
    mut syncs: mpsc::UnboundedReceiver<()>,
    mut stop: StopSignal,
) {
    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            Some(()) = syncs.recv() => {
                while syncs.try_recv().is_ok() {}
                manager.sync_clients().await;
            }
            Some((controller_id, message)) = events.recv() => {
                manager.handle_inbound(&controller_id, message).await;
            }
            else => break,
        }
    }
    debug!("Manager event loop stopped");
}
