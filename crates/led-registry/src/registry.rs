//! Registry core: storage, commit/notify, controllers, drivers, groups

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::*;
use crate::store::{MemoryStore, RegistryStore};
use crate::RegistryError;

/// Callback run after every successful commit
pub type RegistryListener = Box<dyn Fn() + Send + Sync>;

/// Handle returned by [`Registry::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Authoritative device model
///
/// Mutators change in-memory state only. Callers group related mutations
/// and then call [`Registry::commit`], which persists and notifies
/// listeners; nothing is observable outside the process until then.
pub struct Registry {
    pub(crate) data: RegistryData,
    store: Box<dyn RegistryStore>,
    listeners: Vec<(ListenerId, RegistryListener)>,
    next_listener: u64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("data", &self.data)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Trimmed, non-empty, first-occurrence-ordered ids
pub(crate) fn normalize_ids(ids: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

fn normalize_channels(channels: &[i64]) -> Vec<i64> {
    channels
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Registry {
    /// Empty registry backed by `store`
    pub fn new(store: impl RegistryStore + 'static) -> Self {
        Self {
            data: RegistryData::default(),
            store: Box::new(store),
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Registry populated from whatever `store` holds
    pub fn load(store: impl RegistryStore + 'static) -> Result<Self, RegistryError> {
        let mut registry = Self::new(store);
        if let Some(data) = registry.store.load()? {
            registry.data = data;
        }
        debug!(
            "Loaded registry: {} controllers, {} drivers, {} groups",
            registry.data.controllers.len(),
            registry.data.drivers.len(),
            registry.data.groups.len()
        );
        Ok(registry)
    }

    /// Registry that persists to memory only
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    pub fn data(&self) -> &RegistryData {
        &self.data
    }

    /// Persist current state, then notify listeners
    pub fn commit(&mut self) -> Result<(), RegistryError> {
        self.store.save(&self.data)?;
        for (_, listener) in &self.listeners {
            listener();
        }
        Ok(())
    }

    pub fn add_listener(&mut self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    // ------------------------------------------------------------------------
    // Controllers
    // ------------------------------------------------------------------------

    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.data.controllers.values()
    }

    pub fn controller(&self, id: &str) -> Option<&Controller> {
        self.data.controllers.get(id)
    }

    pub fn controller_mut(&mut self, id: &str) -> Option<&mut Controller> {
        self.data.controllers.get_mut(id)
    }

    /// The controller bridging the CAN bus, if one is flagged
    pub fn can_controller(&self) -> Option<&Controller> {
        self.controllers().find(|c| c.has_can_interface)
    }

    /// Insert or update a controller
    ///
    /// Flagging a controller as the CAN interface clears the flag on every
    /// other controller.
    pub fn upsert_controller(&mut self, spec: ControllerSpec) -> Result<Controller, RegistryError> {
        let id = spec.id.clone().unwrap_or_else(|| new_id("ctrl"));
        let port = |raw: Option<String>| raw.filter(|p| !p.trim().is_empty());

        let stored = match self.data.controllers.get(&id) {
            Some(existing) => Controller {
                id: id.clone(),
                name: spec.name.unwrap_or_else(|| existing.name.clone()),
                port: match spec.port {
                    Some(p) => port(Some(p)),
                    None => existing.port.clone(),
                },
                baudrate: spec.baudrate.unwrap_or(existing.baudrate),
                polling_enabled: spec.polling_enabled.unwrap_or(existing.polling_enabled),
                has_can_interface: spec.has_can_interface.unwrap_or(existing.has_can_interface),
                can_sender_id: spec.can_sender_id.or_else(|| existing.can_sender_id.clone()),
                metadata: existing.metadata.clone(),
            },
            None => Controller {
                id: id.clone(),
                name: spec.name.filter(|n| !n.is_empty()).unwrap_or_else(|| id.clone()),
                port: port(spec.port),
                baudrate: spec.baudrate.unwrap_or(DEFAULT_BAUD_RATE),
                polling_enabled: spec.polling_enabled.unwrap_or(false),
                has_can_interface: spec.has_can_interface.unwrap_or(false),
                can_sender_id: spec.can_sender_id,
                metadata: ControllerMetadata::default(),
            },
        };

        if stored.has_can_interface {
            for (other_id, other) in self.data.controllers.iter_mut() {
                if *other_id != id && other.has_can_interface {
                    debug!("Clearing CAN interface flag on controller {}", other_id);
                    other.has_can_interface = false;
                }
            }
        }

        self.data.controllers.insert(id, stored.clone());
        Ok(stored)
    }

    /// Delete a controller and every driver attached to it
    pub fn delete_controller(&mut self, id: &str) -> bool {
        if !self.data.controllers.contains_key(id) {
            return false;
        }
        let drivers: Vec<String> = self
            .drivers()
            .filter(|d| d.controller_id == id)
            .map(|d| d.id.clone())
            .collect();
        for driver_id in drivers {
            self.delete_driver(&driver_id);
        }
        self.data.controllers.remove(id);
        true
    }

    /// Record a TX/RX payload in the controller's rolling diagnostic log
    pub fn append_serial_log(&mut self, controller_id: &str, direction: Direction, payload: Value) {
        let Some(controller) = self.data.controllers.get_mut(controller_id) else {
            return;
        };
        let log = &mut controller.metadata.serial_log;
        log.push_back(SerialLogEntry {
            timestamp: now_ms(),
            direction,
            payload,
        });
        while log.len() > HISTORY_LIMIT {
            log.pop_front();
        }
    }

    // ------------------------------------------------------------------------
    // Drivers and outputs
    // ------------------------------------------------------------------------

    pub fn drivers(&self) -> impl Iterator<Item = &Driver> {
        self.data.drivers.values()
    }

    pub fn driver(&self, id: &str) -> Option<&Driver> {
        self.data.drivers.get(id)
    }

    pub fn driver_mut(&mut self, id: &str) -> Option<&mut Driver> {
        self.data.drivers.get_mut(id)
    }

    pub fn output(&self, id: &str) -> Option<&Output> {
        self.data.outputs.get(id)
    }

    pub fn output_mut(&mut self, id: &str) -> Option<&mut Output> {
        self.data.outputs.get_mut(id)
    }

    /// A driver's outputs in slot order
    pub fn driver_outputs<'a>(&'a self, driver: &'a Driver) -> impl Iterator<Item = &'a Output> + 'a {
        driver.outputs.iter().filter_map(|id| self.data.outputs.get(id))
    }

    /// Look up an output together with its driver
    pub fn output_entry(&self, output_id: &str) -> Option<(&Driver, &Output)> {
        let output = self.data.outputs.get(output_id)?;
        let driver = self.data.drivers.get(&output.driver_id)?;
        Some((driver, output))
    }

    /// Resolve ids to `(driver, output)` pairs, skipping unknown ids
    pub fn resolve_output_ids(&self, ids: &[String]) -> Vec<(&Driver, &Output)> {
        ids.iter().filter_map(|id| self.output_entry(id)).collect()
    }

    /// Insert or update a driver, renormalizing its four output slots
    ///
    /// Slots absent from `spec.outputs` keep their stored values; slots that
    /// never existed get defaults. Disabled slots are forced dark: level 0,
    /// PWM and target at `min_pwm`, fault cleared.
    pub fn upsert_driver(&mut self, spec: DriverSpec) -> Result<Driver, RegistryError> {
        let id = spec.id.clone().unwrap_or_else(|| new_id("drv"));
        let existing = self.data.drivers.get(&id);

        let controller_id = match (&spec.controller_id, existing) {
            (Some(c), _) => c.clone(),
            (None, Some(d)) => d.controller_id.clone(),
            (None, None) => return Err(RegistryError::MissingField("controller_id")),
        };
        let name = spec
            .name
            .clone()
            .or_else(|| existing.map(|d| d.name.clone()))
            .unwrap_or_else(|| id.clone());
        let driver_index = spec
            .driver_index
            .or_else(|| existing.map(|d| d.driver_index))
            .unwrap_or(0);
        let status = existing.and_then(|d| d.status.clone());

        let previous: BTreeMap<usize, Output> = existing
            .map(|d| {
                self.driver_outputs(d)
                    .map(|o| (o.slot, o.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let incoming: BTreeMap<usize, &OutputSpec> = spec
            .outputs
            .iter()
            .enumerate()
            .map(|(idx, o)| (o.slot.unwrap_or(idx), o))
            .collect();

        let mut outputs = Vec::with_capacity(OUTPUTS_PER_DRIVER);
        for slot in 0..OUTPUTS_PER_DRIVER {
            let output = normalize_output(&id, slot, incoming.get(&slot).copied(), previous.get(&slot));
            outputs.push(output);
        }

        for old in previous.values() {
            if !outputs.iter().any(|o| o.id == old.id) {
                self.data.outputs.remove(&old.id);
            }
        }

        let driver = Driver {
            id: id.clone(),
            name,
            controller_id,
            driver_index,
            outputs: outputs.iter().map(|o| o.id.clone()).collect(),
            status,
        };
        for output in outputs {
            self.data.outputs.insert(output.id.clone(), output);
        }
        self.data.drivers.insert(id, driver.clone());
        Ok(driver)
    }

    /// Delete a driver and its outputs, dropping them from every group
    pub fn delete_driver(&mut self, id: &str) -> bool {
        let Some(driver) = self.data.drivers.remove(id) else {
            return false;
        };
        for output_id in &driver.outputs {
            self.data.outputs.remove(output_id);
        }
        for group in self.data.groups.values_mut() {
            group.led_ids.retain(|led| !driver.outputs.contains(led));
        }
        true
    }

    /// Store per-output PWM targets, clamped to each output's range
    ///
    /// Disabled outputs are pinned to `min_pwm`. Returns the outputs whose
    /// target actually changed.
    pub fn apply_output_targets(&mut self, targets: &BTreeMap<String, i64>) -> BTreeMap<String, i64> {
        let mut updated = BTreeMap::new();
        for (output_id, requested) in targets {
            let Some(output) = self.data.outputs.get_mut(output_id) else {
                continue;
            };
            let value = if output.disabled {
                output.min_pwm
            } else {
                output.clamp_pwm(*requested)
            };
            if output.target_pwm != value {
                output.target_pwm = value;
                updated.insert(output_id.clone(), value);
            }
        }
        updated
    }

    // ------------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------------

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.data.groups.values()
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.data.groups.get(id)
    }

    pub fn group_mut(&mut self, id: &str) -> Option<&mut Group> {
        self.data.groups.get_mut(id)
    }

    pub fn upsert_group(&mut self, spec: GroupSpec) -> Group {
        let id = spec.id.clone().unwrap_or_else(|| new_id("group"));
        let existing = self.data.groups.get(&id);
        let group = Group {
            id: id.clone(),
            name: spec
                .name
                .or_else(|| existing.map(|g| g.name.clone()))
                .unwrap_or_else(|| id.clone()),
            led_ids: match &spec.led_ids {
                Some(ids) => normalize_ids(ids),
                None => existing.map(|g| g.led_ids.clone()).unwrap_or_default(),
            },
            is_on: spec
                .is_on
                .or_else(|| existing.map(|g| g.is_on))
                .unwrap_or(false),
            brightness: spec
                .brightness
                .or_else(|| existing.map(|g| g.brightness))
                .unwrap_or(0)
                .clamp(0, 100),
        };
        self.data.groups.insert(id, group.clone());
        group
    }

    pub fn delete_group(&mut self, id: &str) -> bool {
        self.data.groups.remove(id).is_some()
    }

    /// Derived on/off state of a group
    ///
    /// On iff the group has at least one enabled member and every enabled
    /// member is lit or faulted.
    pub fn derive_group_on(&self, group: &Group) -> bool {
        let mut active = self
            .resolve_output_ids(&group.led_ids)
            .into_iter()
            .map(|(_, output)| output)
            .filter(|output| !output.disabled)
            .peekable();
        active.peek().is_some() && active.all(Output::is_accounted_for)
    }

    /// Re-derive every group containing one of `changed_outputs`
    ///
    /// Returns the ids of groups whose `is_on` flipped.
    pub fn refresh_group_states(&mut self, changed_outputs: &BTreeSet<String>) -> BTreeSet<String> {
        if changed_outputs.is_empty() {
            return BTreeSet::new();
        }
        let flips: Vec<(String, bool)> = self
            .groups()
            .filter(|g| g.led_ids.iter().any(|id| changed_outputs.contains(id)))
            .filter_map(|g| {
                let is_on = self.derive_group_on(g);
                (is_on != g.is_on).then(|| (g.id.clone(), is_on))
            })
            .collect();

        let mut flipped = BTreeSet::new();
        for (id, is_on) in flips {
            if let Some(group) = self.data.groups.get_mut(&id) {
                group.is_on = is_on;
                flipped.insert(id);
            }
        }
        flipped
    }
}

fn normalize_output(
    driver_id: &str,
    slot: usize,
    incoming: Option<&OutputSpec>,
    previous: Option<&Output>,
) -> Output {
    let pick = |new: Option<i64>, old: Option<i64>, default: i64| new.or(old).unwrap_or(default);

    let id = incoming
        .and_then(|o| o.id.clone())
        .filter(|id| !id.is_empty())
        .or_else(|| previous.map(|p| p.id.clone()))
        .unwrap_or_else(|| format!("{driver_id}_slot{slot}"));
    let disabled = incoming
        .and_then(|o| o.disabled)
        .or(previous.map(|p| p.disabled))
        .unwrap_or(false);
    let min_pwm = pick(incoming.and_then(|o| o.min_pwm), previous.map(|p| p.min_pwm), 0);
    let max_pwm = pick(
        incoming.and_then(|o| o.max_pwm),
        previous.map(|p| p.max_pwm),
        DEFAULT_MAX_PWM,
    );
    let mut level = pick(incoming.and_then(|o| o.level), previous.map(|p| p.level), 0);
    let mut pwm = pick(incoming.and_then(|o| o.pwm), previous.map(|p| p.pwm), 0);
    let mut target_pwm = pick(
        incoming.and_then(|o| o.target_pwm),
        previous.map(|p| p.target_pwm),
        pwm,
    );
    let mut faulty = incoming
        .and_then(|o| o.faulty)
        .or(previous.map(|p| p.faulty))
        .unwrap_or(false);

    if disabled {
        level = 0;
        pwm = min_pwm;
        target_pwm = min_pwm;
        faulty = false;
    }

    let channels = incoming
        .and_then(|o| o.channels.clone())
        .or_else(|| previous.map(|p| p.channels.clone()))
        .unwrap_or_else(|| vec![slot as i64]);

    if min_pwm > max_pwm {
        warn!(
            "Output {} has min_pwm {} above max_pwm {}",
            id, min_pwm, max_pwm
        );
    }

    Output {
        id,
        driver_id: driver_id.to_string(),
        slot,
        name: incoming
            .and_then(|o| o.name.clone())
            .or_else(|| previous.map(|p| p.name.clone()))
            .unwrap_or_else(|| format!("LED {}", slot + 1)),
        channels: normalize_channels(&channels),
        disabled,
        faulty,
        pwm,
        level,
        min_pwm,
        max_pwm,
        target_pwm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn driver_spec(id: &str) -> DriverSpec {
        DriverSpec {
            id: Some(id.into()),
            controller_id: Some("c1".into()),
            driver_index: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_commit_saves_then_notifies() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = registry.add_listener(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        registry.commit().unwrap();
        assert_eq!(store.saves(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(registry.remove_listener(id));
        registry.commit().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.remove_listener(id));
    }

    #[test]
    fn test_mutations_do_not_persist_until_commit() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(store.clone());
        registry.upsert_group(GroupSpec { id: Some("g".into()), ..Default::default() });
        assert_eq!(store.saves(), 0);
        registry.commit().unwrap();
        assert!(store.saved().unwrap().groups.contains_key("g"));
    }

    #[test]
    fn test_load_restores_saved_data() {
        let store = MemoryStore::new();
        let mut registry = Registry::new(store.clone());
        registry.upsert_driver(driver_spec("d1")).unwrap();
        registry.commit().unwrap();

        let reloaded = Registry::load(store).unwrap();
        assert_eq!(reloaded.driver("d1").unwrap().outputs.len(), 4);
    }

    #[test]
    fn test_can_flag_is_exclusive() {
        let mut registry = Registry::in_memory();
        registry
            .upsert_controller(ControllerSpec {
                id: Some("a".into()),
                has_can_interface: Some(true),
                ..Default::default()
            })
            .unwrap();
        registry
            .upsert_controller(ControllerSpec {
                id: Some("b".into()),
                has_can_interface: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert!(!registry.controller("a").unwrap().has_can_interface);
        assert_eq!(registry.can_controller().unwrap().id, "b");
    }

    #[test]
    fn test_controller_defaults_and_port_clearing() {
        let mut registry = Registry::in_memory();
        let c = registry
            .upsert_controller(ControllerSpec {
                id: Some("c1".into()),
                port: Some("/dev/ttyUSB0".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(c.name, "c1");
        assert_eq!(c.baudrate, DEFAULT_BAUD_RATE);

        let c = registry
            .upsert_controller(ControllerSpec {
                id: Some("c1".into()),
                port: Some(String::new()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(c.port, None);
    }

    #[test]
    fn test_driver_always_has_four_outputs() {
        let mut registry = Registry::in_memory();
        let d = registry.upsert_driver(driver_spec("d1")).unwrap();
        assert_eq!(d.outputs, vec!["d1_slot0", "d1_slot1", "d1_slot2", "d1_slot3"]);
        let o = registry.output("d1_slot2").unwrap();
        assert_eq!(o.name, "LED 3");
        assert_eq!(o.channels, vec![2]);
        assert_eq!((o.min_pwm, o.max_pwm), (0, DEFAULT_MAX_PWM));
    }

    #[test]
    fn test_driver_requires_controller_on_insert() {
        let mut registry = Registry::in_memory();
        let err = registry
            .upsert_driver(DriverSpec { id: Some("d".into()), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingField("controller_id")));
        assert!(registry.driver("d").is_none());
    }

    #[test]
    fn test_reupsert_preserves_slots_by_position() {
        let mut registry = Registry::in_memory();
        let mut spec = driver_spec("d1");
        spec.outputs = vec![
            OutputSpec { id: Some("red".into()), min_pwm: Some(10), pwm: Some(80), ..Default::default() },
            OutputSpec { id: Some("green".into()), channels: Some(vec![3, 1, 3]), ..Default::default() },
        ];
        registry.upsert_driver(spec).unwrap();
        assert_eq!(registry.output("green").unwrap().channels, vec![1, 3]);
        assert_eq!(registry.output("red").unwrap().target_pwm, 80);

        let mut spec = driver_spec("d1");
        spec.outputs = vec![OutputSpec { slot: Some(1), name: Some("Green".into()), ..Default::default() }];
        let d = registry.upsert_driver(spec).unwrap();

        assert_eq!(d.outputs, vec!["red", "green", "d1_slot2", "d1_slot3"]);
        let red = registry.output("red").unwrap();
        assert_eq!((red.min_pwm, red.pwm), (10, 80));
        let green = registry.output("green").unwrap();
        assert_eq!(green.name, "Green");
        assert_eq!(green.channels, vec![1, 3]);
    }

    #[test]
    fn test_disabled_slot_forced_dark() {
        let mut registry = Registry::in_memory();
        let mut spec = driver_spec("d1");
        spec.outputs = vec![OutputSpec {
            disabled: Some(true),
            min_pwm: Some(5),
            pwm: Some(200),
            level: Some(1),
            faulty: Some(true),
            ..Default::default()
        }];
        registry.upsert_driver(spec).unwrap();
        let o = registry.output("d1_slot0").unwrap();
        assert_eq!((o.level, o.pwm, o.target_pwm, o.faulty), (0, 5, 5, false));
    }

    #[test]
    fn test_delete_controller_cascades() {
        let mut registry = Registry::in_memory();
        registry
            .upsert_controller(ControllerSpec { id: Some("c1".into()), ..Default::default() })
            .unwrap();
        registry.upsert_driver(driver_spec("d1")).unwrap();
        registry.upsert_group(GroupSpec {
            id: Some("g".into()),
            led_ids: Some(vec!["d1_slot0".into(), "elsewhere".into()]),
            ..Default::default()
        });

        assert!(registry.delete_controller("c1"));
        assert!(registry.driver("d1").is_none());
        assert!(registry.output("d1_slot0").is_none());
        assert_eq!(registry.group("g").unwrap().led_ids, vec!["elsewhere"]);
    }

    #[test]
    fn test_group_ids_normalized_and_brightness_clamped() {
        let mut registry = Registry::in_memory();
        let g = registry.upsert_group(GroupSpec {
            id: Some("g".into()),
            led_ids: Some(vec![" a ".into(), "b".into(), "a".into(), "".into()]),
            brightness: Some(140),
            ..Default::default()
        });
        assert_eq!(g.led_ids, vec!["a", "b"]);
        assert_eq!(g.brightness, 100);
        assert_eq!(g.name, "g");
    }

    #[test]
    fn test_output_targets_clamped() {
        let mut registry = Registry::in_memory();
        let mut spec = driver_spec("d1");
        spec.outputs = vec![
            OutputSpec { min_pwm: Some(10), max_pwm: Some(100), ..Default::default() },
            OutputSpec { disabled: Some(true), min_pwm: Some(3), ..Default::default() },
        ];
        registry.upsert_driver(spec).unwrap();

        let targets = BTreeMap::from([
            ("d1_slot0".to_string(), 250),
            ("d1_slot1".to_string(), 90),
            ("missing".to_string(), 1),
        ]);
        let updated = registry.apply_output_targets(&targets);
        assert_eq!(updated, BTreeMap::from([("d1_slot0".to_string(), 100)]));
        assert_eq!(registry.output("d1_slot1").unwrap().target_pwm, 3);
    }

    #[test]
    fn test_serial_log_capped() {
        let mut registry = Registry::in_memory();
        registry
            .upsert_controller(ControllerSpec { id: Some("c1".into()), ..Default::default() })
            .unwrap();
        for i in 0..(HISTORY_LIMIT + 5) {
            registry.append_serial_log("c1", Direction::Tx, serde_json::json!({ "n": i }));
        }
        let log = &registry.controller("c1").unwrap().metadata.serial_log;
        assert_eq!(log.len(), HISTORY_LIMIT);
        assert_eq!(log.front().unwrap().payload["n"], 5);
    }
}
