//! LED Fleet Control Engine
//!
//! This crate drives a fleet of LED controller boards over serial links and
//! keeps the shared [`Registry`](led_registry::Registry) in step with what
//! the hardware reports.
//!
//! # Architecture
//!
//! The engine is layered:
//!
//! - **Transport**: one resilient serial link per controller, with queued
//!   writes that survive reconnects
//! - **Multiplexer**: per-transport dispatch loops that decode lines and fan
//!   them out to listeners by event name
//! - **Manager**: group/output/SSR commands, event reconciliation, status
//!   polling and the physical button state machine
//!
//! Strict operations (user initiated) return a [`ManagerError`]; ambient
//! work such as polling and ramping logs problems and carries on.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use led_mux::{LedManager, ManagerConfig};
//! use led_registry::{JsonFileStore, Registry};
//! use tokio::sync::Mutex;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::load(JsonFileStore::new("registry.json"))?;
//! let manager = LedManager::start(Arc::new(Mutex::new(registry)), ManagerConfig::default()).await;
//!
//! manager.apply_group_action("kitchen", true).await?;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod button;
pub mod config;
pub mod error;
pub mod manager;
pub mod multiplexer;
pub mod tasks;
pub mod transport;

pub use button::{ButtonAction, ButtonKey, ButtonTable, ButtonTiming, RampDirection};
pub use config::ManagerConfig;
pub use error::{ManagerError, MuxError, TransportError};
pub use manager::{
    batch_pwm_updates, GroupStateEvent, LedChannelConfig, LedManager, PwmUpdates, SerialStatus,
    SerialTransports, SharedRegistry, SsrDispatch, TransportFactory,
};
pub use multiplexer::{Listener, ListenerResult, Multiplexer, ANY_ROUTE};
pub use tasks::{StopSignal, TaskHandle};
pub use transport::{BoxedIo, Connector, FnConnector, SerialConnector, SerialIo, Transport};
