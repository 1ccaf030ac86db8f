//! LED Fleet Device Registry
//!
//! This crate holds the authoritative model of an LED controller fleet:
//!
//! - **Controllers** reachable over one serial link each
//! - **Drivers** with exactly four **Output** slots
//! - **Groups** of outputs with a shared brightness and a derived on/off flag
//! - **Switches** and their mapped **Buttons**, plus learned button bits
//! - **SSR** relay entries and **patch-panel** labels
//!
//! # Architecture
//!
//! Entities are stored as flat maps keyed by id, with children pointing at
//! their parent. Mutations validate first and touch state second, so a
//! rejected call leaves the registry as it was. Nothing is persisted until
//! [`Registry::commit`], which saves through a [`RegistryStore`] and then
//! runs every registered listener.
//!
//! # Example
//!
//! ```rust
//! use led_registry::{DriverSpec, GroupSpec, MapFilter, Registry};
//!
//! let mut registry = Registry::in_memory();
//! registry
//!     .upsert_driver(DriverSpec {
//!         id: Some("d0".into()),
//!         controller_id: Some("porch".into()),
//!         ..Default::default()
//!     })
//!     .unwrap();
//! registry.upsert_group(GroupSpec {
//!     id: Some("steps".into()),
//!     led_ids: Some(vec!["d0_slot0".into()]),
//!     brightness: Some(100),
//!     ..Default::default()
//! });
//!
//! let map = registry.build_group_pwm_map("steps", MapFilter::default(), None);
//! assert_eq!(map["porch"][&0], [255, -1, -1, -1]);
//! registry.commit().unwrap();
//! ```

pub mod error;
pub mod maps;
pub mod metrics;
pub mod model;
mod peripherals;
pub mod registry;
pub mod store;
mod switches;
pub mod views;

pub use error::RegistryError;
pub use maps::{brightness_to_pwm, ChannelMap, MapFilter, PwmMap};
pub use metrics::{ControllerMetrics, MetricsSnapshot, MetricsTotals, SensorMetrics};
pub use model::*;
pub use registry::{ListenerId, Registry, RegistryListener};
pub use store::{JsonFileStore, MemoryStore, RegistryStore};
pub use views::{GroupStateView, OutputDescriptor, PatchPanelSnapshot, RegistrySnapshot, SsrSnapshot};
