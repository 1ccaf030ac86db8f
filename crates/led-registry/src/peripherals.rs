//! SSR relay entries and patch-panel labels

use crate::model::*;
use crate::registry::{new_id, normalize_ids, Registry};
use crate::RegistryError;

impl Registry {
    pub fn ssr_config(&self) -> &SsrConfig {
        &self.data.ssr
    }

    pub fn ssr_entry(&self, id: &str) -> Option<&SsrEntry> {
        self.data.ssr.entries.get(id)
    }

    /// Set the relay board's CAN base address, clamped to 0..=255
    pub fn set_ssr_base_address(&mut self, address: i64) -> u8 {
        let value = address.clamp(0, 255) as u8;
        self.data.ssr.base_address = value;
        value
    }

    pub fn upsert_ssr_entry(&mut self, spec: SsrEntrySpec) -> Result<SsrEntry, RegistryError> {
        let id = spec.id.clone().unwrap_or_else(|| new_id("ssr"));
        let entries = &self.data.ssr.entries;
        let existing = entries.get(&id);

        if existing.is_none() && entries.len() >= SSR_MAX_ENTRIES {
            return Err(RegistryError::SsrLimit(SSR_MAX_ENTRIES));
        }
        if !(0..i64::from(SSR_MAX_BITS)).contains(&spec.bit_index) {
            return Err(RegistryError::InvalidSsrBit {
                got: spec.bit_index,
                max: SSR_MAX_BITS - 1,
            });
        }
        let bit_index = spec.bit_index as u8;
        if entries
            .values()
            .any(|e| e.id != id && e.bit_index == bit_index)
        {
            return Err(RegistryError::DuplicateSsrBit(bit_index));
        }

        let entry = SsrEntry {
            id: id.clone(),
            name: spec
                .name
                .filter(|n| !n.is_empty())
                .or_else(|| existing.map(|e| e.name.clone()))
                .unwrap_or_else(|| id.clone()),
            bit_index,
            group_id: spec.group_id.or_else(|| existing.and_then(|e| e.group_id.clone())),
            is_on: spec
                .is_on
                .or_else(|| existing.map(|e| e.is_on))
                .unwrap_or(false),
        };
        self.data.ssr.entries.insert(id, entry.clone());
        Ok(entry)
    }

    pub fn delete_ssr_entry(&mut self, id: &str) -> bool {
        self.data.ssr.entries.remove(id).is_some()
    }

    /// Relay mask with one bit set per entry that is on
    pub fn ssr_state_mask(&self) -> u16 {
        self.data
            .ssr
            .entries
            .values()
            .filter(|e| e.is_on && e.bit_index < SSR_MAX_BITS)
            .fold(0, |mask, e| mask | (1 << e.bit_index))
    }

    /// Record an entry's relay state, returning the resulting mask
    pub fn set_ssr_entry_state(&mut self, id: &str, on: bool) -> Result<u16, RegistryError> {
        let entry = self
            .data
            .ssr
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found("SSR entry", id))?;
        entry.is_on = on;
        Ok(self.ssr_state_mask())
    }

    /// All patch-panel ports in order, with defaults for unedited ports
    pub fn patch_panel_ports(&self) -> Vec<PatchPanelPort> {
        (1..=PATCH_PANEL_PORTS)
            .map(|n| {
                self.data
                    .patch_panel
                    .get(&n.to_string())
                    .cloned()
                    .unwrap_or_else(|| PatchPanelPort::unlabeled(n))
            })
            .collect()
    }

    pub fn upsert_patch_panel_port(
        &mut self,
        spec: PatchPanelPortSpec,
    ) -> Result<PatchPanelPort, RegistryError> {
        if !(1..=i64::from(PATCH_PANEL_PORTS)).contains(&spec.port_number) {
            return Err(RegistryError::InvalidPort {
                got: spec.port_number,
                max: PATCH_PANEL_PORTS,
            });
        }
        let number = spec.port_number as u8;
        let key = number.to_string();
        let current = self
            .data
            .patch_panel
            .get(&key)
            .cloned()
            .unwrap_or_else(|| PatchPanelPort::unlabeled(number));

        let port = PatchPanelPort {
            label: spec
                .label
                .filter(|l| !l.is_empty())
                .unwrap_or(current.label),
            notes: spec.notes.unwrap_or(current.notes),
            led_ids: match spec.led_ids {
                Some(ids) => normalize_ids(&ids),
                None => current.led_ids,
            },
            ..current
        };
        self.data.patch_panel.insert(key, port.clone());
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssr(id: &str, bit: i64) -> SsrEntrySpec {
        SsrEntrySpec {
            id: Some(id.into()),
            bit_index: bit,
            ..Default::default()
        }
    }

    #[test]
    fn test_base_address_clamped() {
        let mut registry = Registry::in_memory();
        assert_eq!(registry.set_ssr_base_address(-3), 0);
        assert_eq!(registry.set_ssr_base_address(300), 255);
        assert_eq!(registry.ssr_config().base_address, 255);
    }

    #[test]
    fn test_ssr_bit_validation() {
        let mut registry = Registry::in_memory();
        assert!(matches!(
            registry.upsert_ssr_entry(ssr("a", 10)),
            Err(RegistryError::InvalidSsrBit { got: 10, max: 9 })
        ));
        registry.upsert_ssr_entry(ssr("a", 3)).unwrap();
        assert!(matches!(
            registry.upsert_ssr_entry(ssr("b", 3)),
            Err(RegistryError::DuplicateSsrBit(3))
        ));
        registry.upsert_ssr_entry(ssr("a", 4)).unwrap();
        assert_eq!(registry.ssr_entry("a").unwrap().bit_index, 4);
    }

    #[test]
    fn test_ssr_entry_limit() {
        let mut registry = Registry::in_memory();
        for bit in 0..10 {
            registry.upsert_ssr_entry(ssr(&format!("e{bit}"), bit)).unwrap();
        }
        assert!(matches!(
            registry.upsert_ssr_entry(ssr("extra", 0)),
            Err(RegistryError::SsrLimit(10))
        ));
    }

    #[test]
    fn test_state_mask() {
        let mut registry = Registry::in_memory();
        registry.upsert_ssr_entry(ssr("a", 0)).unwrap();
        registry.upsert_ssr_entry(ssr("b", 9)).unwrap();
        assert_eq!(registry.set_ssr_entry_state("b", true).unwrap(), 1 << 9);
        assert_eq!(registry.set_ssr_entry_state("a", true).unwrap(), (1 << 9) | 1);
        assert_eq!(registry.set_ssr_entry_state("b", false).unwrap(), 1);
        assert!(registry.set_ssr_entry_state("zzz", true).is_err());
    }

    #[test]
    fn test_patch_panel_defaults_and_edits() {
        let mut registry = Registry::in_memory();
        let ports = registry.patch_panel_ports();
        assert_eq!(ports.len(), 48);
        assert_eq!(ports[47].label, "Port 48");

        let port = registry
            .upsert_patch_panel_port(PatchPanelPortSpec {
                port_number: 12,
                label: Some("Kitchen".into()),
                led_ids: Some(vec!["x".into(), "x".into()]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(port.id, "12");
        assert_eq!(port.led_ids, vec!["x"]);
        assert_eq!(registry.patch_panel_ports()[11].label, "Kitchen");

        assert!(matches!(
            registry.upsert_patch_panel_port(PatchPanelPortSpec { port_number: 49, ..Default::default() }),
            Err(RegistryError::InvalidPort { got: 49, max: 48 })
        ));
    }
}
