//! Line-JSON protocol multiplexer
//!
//! The [`Multiplexer`] sits between the transports and whoever cares about
//! controller traffic. It runs one dispatch loop per registered transport,
//! decodes each line and fans the result out to listeners registered by
//! route key (an event name, or [`STATUS_ROUTE`](led_protocol::STATUS_ROUTE)).
//!
//! Listeners registered under [`ANY_ROUTE`] see every classified message.

use std::collections::HashMap;
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use led_protocol::{decode_line, Command, InboundMessage};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::MuxError;
use crate::tasks::{lock, StopSignal, TaskHandle};
use crate::transport::Transport;

/// Route key that matches every message
pub const ANY_ROUTE: &str = "*";

pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Callback invoked with the transport name and the decoded message
pub type Listener = Arc<dyn Fn(&str, &InboundMessage) -> ListenerResult + Send + Sync>;

struct Registered {
    transport: Transport,
    dispatch: TaskHandle,
}

struct MuxInner {
    dequeue_timeout: Duration,
    slow_dequeue: Duration,
    transports: Mutex<HashMap<String, Registered>>,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

/// Routes traffic between named transports and listeners
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("transports", &self.transport_names())
            .finish()
    }
}

impl Multiplexer {
    /// `dequeue_timeout` bounds each wait for a line; waits longer than
    /// `slow_dequeue` are logged
    pub fn new(dequeue_timeout: Duration, slow_dequeue: Duration) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                dequeue_timeout,
                slow_dequeue,
                transports: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start dispatching lines from `transport` under `name`
    ///
    /// A transport already registered under the same name is replaced and
    /// its dispatch loop aborted.
    pub fn register_transport(&self, name: impl Into<String>, transport: Transport) {
        let name = name.into();
        let inner = self.inner.clone();
        let loop_name = name.clone();
        let loop_transport = transport.clone();
        let dispatch = TaskHandle::spawn(move |stop| {
            dispatch_loop(inner, loop_name, loop_transport, stop)
        });

        let previous = lock(&self.inner.transports).insert(
            name.clone(),
            Registered {
                transport,
                dispatch,
            },
        );
        if let Some(previous) = previous {
            previous.dispatch.abort();
        }
        debug!("Registered transport {}", name);
    }

    /// Stop dispatching for `name` and wait for its loop to exit
    ///
    /// The transport itself is returned unclosed.
    pub async fn unregister_transport(&self, name: &str) -> Option<Transport> {
        let registered = lock(&self.inner.transports).remove(name)?;
        registered.dispatch.stop().await;
        debug!("Unregistered transport {}", name);
        Some(registered.transport)
    }

    /// Stop every dispatch loop
    pub async fn unregister_all(&self) -> Vec<(String, Transport)> {
        let drained: Vec<(String, Registered)> = lock(&self.inner.transports).drain().collect();
        let mut transports = Vec::with_capacity(drained.len());
        for (name, registered) in drained {
            registered.dispatch.cancel().await;
            transports.push((name, registered.transport));
        }
        transports
    }

    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.inner.transports).contains_key(name)
    }

    pub fn transport(&self, name: &str) -> Option<Transport> {
        lock(&self.inner.transports)
            .get(name)
            .map(|registered| registered.transport.clone())
    }

    pub fn transport_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.transports).keys().cloned().collect();
        names.sort();
        names
    }

    /// Add a listener for `route_key`
    pub fn register_listener(&self, route_key: impl Into<String>, listener: Listener) {
        lock(&self.inner.listeners)
            .entry(route_key.into())
            .or_default()
            .push(listener);
    }

    /// Encode `command` and queue it on the transport named `name`
    pub fn send(&self, name: &str, command: &Command) -> Result<(), MuxError> {
        let transport = self
            .transport(name)
            .ok_or_else(|| MuxError::NotRegistered(name.to_string()))?;
        let line = command.to_line()?;
        transport.send(line)?;
        Ok(())
    }
}

impl MuxInner {
    fn dispatch(&self, name: &str, line: &str) {
        let message = match decode_line(line) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping malformed line from {}: {} ({})", name, e, line);
                return;
            }
        };

        let route = message.route_key();
        let targets: Vec<Listener> = {
            let listeners = lock(&self.listeners);
            [route, ANY_ROUTE]
                .iter()
                .filter_map(|key| listeners.get(*key))
                .flatten()
                .cloned()
                .collect()
        };

        for listener in targets {
            match catch_unwind(AssertUnwindSafe(|| listener(name, &message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Listener for {} on {} failed: {}", route, name, e),
                Err(_) => error!("Listener for {} on {} panicked", route, name),
            }
        }
    }
}

async fn dispatch_loop(
    inner: Arc<MuxInner>,
    name: String,
    transport: Transport,
    mut stop: StopSignal,
) {
    loop {
        let started = Instant::now();
        let line = tokio::select! {
            _ = stop.stopped() => break,
            line = transport.recv_line(inner.dequeue_timeout) => line,
        };
        let Some(line) = line else {
            continue;
        };

        let waited = started.elapsed();
        if waited > inner.slow_dequeue {
            debug!("Dequeue on {} took {:?}", name, waited);
        }
        inner.dispatch(&name, &line);
    }
    debug!("Dispatch loop for {} stopped", name);
}
