//! Switch panels, mapped buttons and learned button discoveries

use tracing::debug;

use crate::model::*;
use crate::registry::{new_id, now_ms, Registry};
use crate::RegistryError;

fn is_single_bit(mask: i64) -> bool {
    mask > 0 && mask & (mask - 1) == 0
}

fn clamp_button_count(count: i64) -> u8 {
    count.clamp(1, i64::from(MAX_BUTTONS_PER_SWITCH)) as u8
}

impl Registry {
    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.data.switches.values()
    }

    pub fn switch(&self, id: &str) -> Option<&Switch> {
        self.data.switches.get(id)
    }

    pub fn switch_by_address(&self, address: i64) -> Option<&Switch> {
        self.switches().find(|s| s.switch == address)
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.data.buttons.values()
    }

    pub fn button(&self, id: &str) -> Option<&Button> {
        self.data.buttons.get(id)
    }

    pub fn learned_buttons(&self) -> impl Iterator<Item = &LearnedButton> {
        self.data.learned_buttons.values()
    }

    /// Insert or update a switch panel
    ///
    /// The button count is clamped to 1..=5. Child buttons follow a change
    /// of hardware address.
    pub fn upsert_switch(&mut self, spec: SwitchSpec) -> Switch {
        let id = spec.id.clone().unwrap_or_else(|| new_id("switch"));
        let existing = self.data.switches.get(&id);

        let address = spec
            .switch
            .or_else(|| existing.map(|s| s.switch))
            .unwrap_or(0);
        let default_name = match spec.switch {
            Some(address) => format!("Switch {address}"),
            None => format!("Switch {id}"),
        };
        let switch = Switch {
            id: id.clone(),
            name: spec
                .name
                .filter(|n| !n.is_empty())
                .or_else(|| existing.map(|s| s.name.clone()))
                .unwrap_or(default_name),
            switch: address,
            kind: spec
                .kind
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .or_else(|| existing.map(|s| s.kind.clone()))
                .unwrap_or_else(|| "momentary".to_string()),
            button_count: spec
                .button_count
                .map(clamp_button_count)
                .or_else(|| existing.map(|s| s.button_count))
                .unwrap_or(MAX_BUTTONS_PER_SWITCH),
            has_buzzer: spec
                .has_buzzer
                .or_else(|| existing.map(|s| s.has_buzzer))
                .unwrap_or(false),
            flash_leds: spec
                .flash_leds
                .or_else(|| existing.map(|s| s.flash_leds))
                .unwrap_or(true),
        };

        for button in self.data.buttons.values_mut() {
            if button.switch_id == id {
                button.switch = address;
            }
        }
        self.data.switches.insert(id, switch.clone());
        switch
    }

    /// Delete a switch, its buttons and their learned records
    pub fn delete_switch(&mut self, id: &str) -> bool {
        let Some(switch) = self.data.switches.remove(id) else {
            return false;
        };
        let removed: Vec<Button> = self
            .data
            .buttons
            .values()
            .filter(|b| b.switch_id == id)
            .cloned()
            .collect();
        for button in removed {
            self.data.buttons.remove(&button.id);
            self.data
                .learned_buttons
                .remove(&LearnedButton::key(switch.switch, button.mask));
        }
        true
    }

    /// Insert or update a button mapping
    ///
    /// The parent switch is resolved by `switch_id`, then by hardware
    /// address. The mask must be a single set bit, unused by any sibling,
    /// and a new button must fit within the switch's button count. Claiming
    /// a mask removes the matching learned record.
    pub fn upsert_button(&mut self, spec: ButtonSpec) -> Result<Button, RegistryError> {
        let parent = spec
            .switch_id
            .as_deref()
            .and_then(|id| self.switch(id))
            .or_else(|| spec.switch.and_then(|address| self.switch_by_address(address)))
            .cloned()
            .ok_or(RegistryError::UnknownSwitch)?;

        if !is_single_bit(spec.mask) {
            return Err(RegistryError::InvalidMask(spec.mask));
        }

        let id = spec.id.clone().unwrap_or_else(|| new_id("btn"));
        let existing = self.data.buttons.get(&id);
        let siblings: Vec<&Button> = self
            .buttons()
            .filter(|b| b.switch_id == parent.id && b.id != id)
            .collect();

        if siblings.iter().any(|b| b.mask == spec.mask) {
            return Err(RegistryError::DuplicateMask {
                switch_id: parent.id,
                mask: spec.mask,
            });
        }
        if existing.is_none() && siblings.len() >= usize::from(parent.button_count) {
            return Err(RegistryError::ButtonLimit {
                switch_id: parent.id,
                limit: parent.button_count,
            });
        }

        let button = Button {
            id: id.clone(),
            name: spec
                .name
                .filter(|n| !n.is_empty())
                .or_else(|| existing.map(|b| b.name.clone()))
                .unwrap_or_else(|| format!("{} Button", parent.name)),
            switch_id: parent.id.clone(),
            switch: parent.switch,
            mask: spec.mask,
            group_id: spec.group_id.or_else(|| existing.and_then(|b| b.group_id.clone())),
        };

        self.data
            .learned_buttons
            .remove(&LearnedButton::key(button.switch, button.mask));
        self.data.buttons.insert(id, button.clone());
        Ok(button)
    }

    pub fn delete_button(&mut self, id: &str) -> bool {
        let Some(button) = self.data.buttons.remove(id) else {
            return false;
        };
        self.data
            .learned_buttons
            .remove(&LearnedButton::key(button.switch, button.mask));
        true
    }

    /// Count an observation of an unmapped button bit
    pub fn record_learned_switch(&mut self, controller_id: Option<&str>, switch: i64, mask: i64) {
        if mask <= 0 {
            return;
        }
        let key = LearnedButton::key(switch, mask);
        let now = now_ms();
        match self.data.learned_buttons.get_mut(&key) {
            Some(entry) => {
                entry.count += 1;
                entry.last_seen = now;
                if let Some(controller_id) = controller_id {
                    entry.controller_id = Some(controller_id.to_string());
                }
            }
            None => {
                debug!("Learned new button {}", key);
                self.data.learned_buttons.insert(
                    key.clone(),
                    LearnedButton {
                        id: key,
                        controller_id: controller_id.map(str::to_string),
                        switch,
                        mask,
                        count: 1,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Dismiss a learned record so it can be discovered again
    pub fn delete_learned_button(&mut self, key: &str) -> bool {
        self.data.learned_buttons.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_switch(button_count: i64) -> Registry {
        let mut registry = Registry::in_memory();
        registry.upsert_switch(SwitchSpec {
            id: Some("sw".into()),
            name: Some("Hall".into()),
            switch: Some(7),
            button_count: Some(button_count),
            ..Default::default()
        });
        registry
    }

    fn button(id: &str, mask: i64) -> ButtonSpec {
        ButtonSpec {
            id: Some(id.into()),
            switch_id: Some("sw".into()),
            mask,
            ..Default::default()
        }
    }

    #[test]
    fn test_switch_defaults() {
        let mut registry = Registry::in_memory();
        let s = registry.upsert_switch(SwitchSpec {
            switch: Some(3),
            button_count: Some(9),
            ..Default::default()
        });
        assert_eq!(s.name, "Switch 3");
        assert_eq!(s.kind, "momentary");
        assert_eq!(s.button_count, 5);
        assert!(s.flash_leds && !s.has_buzzer);
        let s = registry.upsert_switch(SwitchSpec {
            id: Some(s.id),
            button_count: Some(0),
            ..Default::default()
        });
        assert_eq!(s.button_count, 1);
        assert_eq!(s.switch, 3);
    }

    #[test]
    fn test_mask_must_be_single_bit() {
        let mut registry = registry_with_switch(5);
        for mask in [0, -4, 3, 12] {
            let err = registry.upsert_button(button("b", mask)).unwrap_err();
            assert!(matches!(err, RegistryError::InvalidMask(m) if m == mask));
        }
        assert_eq!(registry.buttons().count(), 0);
    }

    #[test]
    fn test_duplicate_mask_rejected_without_mutation() {
        let mut registry = registry_with_switch(5);
        registry.upsert_button(button("a", 4)).unwrap();
        let before = registry.data().clone();
        let err = registry.upsert_button(button("b", 4)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateMask { mask: 4, .. }));
        assert_eq!(registry.data(), &before);

        // Re-saving the same button with its own mask is fine
        registry.upsert_button(button("a", 4)).unwrap();
    }

    #[test]
    fn test_button_limit_applies_to_new_buttons() {
        let mut registry = registry_with_switch(2);
        registry.upsert_button(button("a", 1)).unwrap();
        registry.upsert_button(button("b", 2)).unwrap();
        let err = registry.upsert_button(button("c", 4)).unwrap_err();
        assert!(matches!(err, RegistryError::ButtonLimit { limit: 2, .. }));
        registry.upsert_button(button("b", 8)).unwrap();
    }

    #[test]
    fn test_button_resolves_switch_by_address() {
        let mut registry = registry_with_switch(5);
        let b = registry
            .upsert_button(ButtonSpec { switch: Some(7), mask: 2, ..Default::default() })
            .unwrap();
        assert_eq!(b.switch_id, "sw");
        assert_eq!(b.name, "Hall Button");

        let err = registry
            .upsert_button(ButtonSpec { switch: Some(99), mask: 2, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownSwitch));
    }

    #[test]
    fn test_buttons_follow_switch_address() {
        let mut registry = registry_with_switch(5);
        registry.upsert_button(button("a", 1)).unwrap();
        registry.upsert_switch(SwitchSpec {
            id: Some("sw".into()),
            switch: Some(9),
            ..Default::default()
        });
        assert_eq!(registry.button("a").unwrap().switch, 9);
    }

    #[test]
    fn test_learned_records_claimed_and_dismissed() {
        let mut registry = registry_with_switch(5);
        registry.record_learned_switch(Some("c1"), 7, 4);
        registry.record_learned_switch(None, 7, 4);
        registry.record_learned_switch(Some("c1"), 7, 0);
        let learned = registry.learned_buttons().next().unwrap();
        assert_eq!(learned.id, "7:4");
        assert_eq!(learned.count, 2);
        assert_eq!(learned.controller_id.as_deref(), Some("c1"));

        registry.upsert_button(button("a", 4)).unwrap();
        assert_eq!(registry.learned_buttons().count(), 0);

        registry.record_learned_switch(Some("c1"), 7, 8);
        assert!(registry.delete_learned_button("7:8"));
        assert!(!registry.delete_learned_button("7:8"));
    }

    #[test]
    fn test_delete_switch_cascades() {
        let mut registry = registry_with_switch(5);
        registry.upsert_button(button("a", 1)).unwrap();
        registry.record_learned_switch(None, 7, 2);
        registry.upsert_button(button("b", 2)).unwrap();
        registry.record_learned_switch(None, 7, 16);

        assert!(registry.delete_switch("sw"));
        assert_eq!(registry.buttons().count(), 0);
        let remaining: Vec<_> = registry.learned_buttons().map(|l| l.id.clone()).collect();
        assert_eq!(remaining, vec!["7:16"]);
    }
}
