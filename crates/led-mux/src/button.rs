//! Physical button interaction state machine
//!
//! Switch panels report a bitmask of pressed buttons inside CAN frames. The
//! [`ButtonTable`] compares each report with the previous one for the same
//! switch and turns edges into [`ButtonAction`]s:
//!
//! | Edge | Condition | Action |
//! |------|-----------|--------|
//! | rising | within the double-press window of the last release | [`ButtonAction::Reverse`] |
//! | rising | otherwise | [`ButtonAction::Toggle`] |
//! | falling | | [`ButtonAction::Release`] |
//! | still set | held past the hold threshold | [`ButtonAction::Hold`] |
//!
//! The table never touches the registry or spawns tasks; the manager acts
//! on what it returns.

use std::collections::BTreeMap;
use std::time::Duration;

use led_protocol::ButtonReport;
use led_registry::Button;
use tokio::time::Instant;

/// `(switch address, mask bit)`
pub type ButtonKey = (i64, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RampDirection {
    #[default]
    Up,
    Down,
}

impl RampDirection {
    pub fn reversed(self) -> Self {
        match self {
            RampDirection::Up => RampDirection::Down,
            RampDirection::Down => RampDirection::Up,
        }
    }

    /// `+1` for up, `-1` for down
    pub fn sign(self) -> i64 {
        match self {
            RampDirection::Up => 1,
            RampDirection::Down => -1,
        }
    }
}

/// What the manager should do in response to a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Single press: flip the bound group
    Toggle { key: ButtonKey, group_id: String },
    /// Double press: ramp direction changed
    Reverse { key: ButtonKey, direction: RampDirection },
    /// Button let go: stop any ramp
    Release { key: ButtonKey },
    /// Button held long enough to ramp
    Hold {
        key: ButtonKey,
        group_id: String,
        direction: RampDirection,
    },
}

/// Result of feeding one report through the table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Newly set bits with no button mapped to them
    pub learned: Vec<i64>,
    pub actions: Vec<ButtonAction>,
}

#[derive(Debug, Clone)]
struct ButtonState {
    group_id: Option<String>,
    pressed: bool,
    pressed_at: Option<Instant>,
    last_release: Option<Instant>,
    direction: RampDirection,
}

impl ButtonState {
    fn new(group_id: Option<String>) -> Self {
        Self {
            group_id,
            pressed: false,
            pressed_at: None,
            last_release: None,
            direction: RampDirection::Up,
        }
    }
}

/// Timing thresholds for press classification
#[derive(Debug, Clone, Copy)]
pub struct ButtonTiming {
    pub double_press_window: Duration,
    pub hold_threshold: Duration,
}

/// Per-button interaction state plus the last mask seen per switch
#[derive(Debug, Default)]
pub struct ButtonTable {
    buttons: BTreeMap<ButtonKey, ButtonState>,
    masks: BTreeMap<i64, i64>,
}

/// Individual set bits of `mask`, lowest first
pub fn mask_bits(mask: i64) -> Vec<i64> {
    let mut bits = Vec::new();
    if mask < 0 {
        return bits;
    }
    let mut rest = mask;
    while rest != 0 {
        let bit = rest & rest.wrapping_neg();
        bits.push(bit);
        rest ^= bit;
    }
    bits
}

impl ButtonTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the table from the registry's buttons
    ///
    /// Interaction state of buttons that still exist is kept. Returns the
    /// keys that disappeared so their ramps can be cancelled.
    pub fn sync<'a>(&mut self, buttons: impl IntoIterator<Item = &'a Button>) -> Vec<ButtonKey> {
        let mut next = BTreeMap::new();
        for button in buttons {
            if button.mask <= 0 {
                continue;
            }
            let key = (button.switch, button.mask);
            let state = match self.buttons.remove(&key) {
                Some(mut state) => {
                    state.group_id = button.group_id.clone();
                    state
                }
                None => ButtonState::new(button.group_id.clone()),
            };
            next.insert(key, state);
        }

        let removed = std::mem::replace(&mut self.buttons, next)
            .into_keys()
            .collect();
        let switches: Vec<i64> = self.buttons.keys().map(|(switch, _)| *switch).collect();
        self.masks.retain(|switch, _| switches.contains(switch));
        removed
    }

    pub fn clear(&mut self) -> Vec<ButtonKey> {
        self.masks.clear();
        std::mem::take(&mut self.buttons).into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.buttons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }

    pub fn is_pressed(&self, key: ButtonKey) -> bool {
        self.buttons.get(&key).is_some_and(|state| state.pressed)
    }

    pub fn direction(&self, key: ButtonKey) -> Option<RampDirection> {
        self.buttons.get(&key).map(|state| state.direction)
    }

    /// Last mask reported for `switch`, or 0
    pub fn last_mask(&self, switch: i64) -> i64 {
        self.masks.get(&switch).copied().unwrap_or(0)
    }

    /// Classify one switch report
    pub fn observe(
        &mut self,
        report: ButtonReport,
        now: Instant,
        timing: ButtonTiming,
    ) -> Observation {
        let ButtonReport { switch, mask } = report;
        let previous = self.masks.insert(switch, mask).unwrap_or(0);

        let mut observation = Observation::default();
        let fresh = mask & !previous;
        if fresh > 0 {
            observation.learned = mask_bits(fresh)
                .into_iter()
                .filter(|bit| !self.buttons.contains_key(&(switch, *bit)))
                .collect();
        }

        let on_switch = self
            .buttons
            .iter_mut()
            .filter(|((owner, _), _)| *owner == switch);
        for (&key, state) in on_switch {
            let bit = key.1;
            let pressed = mask & bit != 0;
            let was_pressed = previous & bit != 0;

            match (was_pressed, pressed) {
                (false, true) => {
                    state.pressed = true;
                    state.pressed_at = Some(now);
                    let double = state.last_release.is_some_and(|released| {
                        now.duration_since(released) <= timing.double_press_window
                    });
                    if double {
                        state.direction = state.direction.reversed();
                        observation.actions.push(ButtonAction::Reverse {
                            key,
                            direction: state.direction,
                        });
                    } else if let Some(group_id) = &state.group_id {
                        observation.actions.push(ButtonAction::Toggle {
                            key,
                            group_id: group_id.clone(),
                        });
                    }
                }
                (true, false) => {
                    state.pressed = false;
                    state.pressed_at = None;
                    state.last_release = Some(now);
                    observation.actions.push(ButtonAction::Release { key });
                }
                (true, true) => {
                    let held_long_enough = state
                        .pressed_at
                        .is_some_and(|since| now.duration_since(since) >= timing.hold_threshold);
                    if let (true, Some(group_id)) = (held_long_enough, &state.group_id) {
                        observation.actions.push(ButtonAction::Hold {
                            key,
                            group_id: group_id.clone(),
                            direction: state.direction,
                        });
                    }
                }
                (false, false) => {}
            }
        }
        observation
    }
}
