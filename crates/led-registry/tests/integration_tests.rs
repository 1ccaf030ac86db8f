//! Integration tests for the device registry
//!
//! These tests verify behavior across registry sections:
//! - Persistence through the JSON file store
//! - Group state derivation over shared outputs
//! - PWM and channel map bounds
//! - Metrics and views over a populated fleet

use std::collections::BTreeSet;

use led_registry::{
    ButtonSpec, ControllerSpec, DriverSpec, GroupSpec, JsonFileStore, MapFilter, MetricsSnapshot,
    OutputSpec, Registry, SwitchSpec,
};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// One controller with one driver whose four outputs carry the given
    /// `(level, faulty, disabled)` flags
    pub fn fleet(flags: &[(i64, bool, bool)]) -> Registry {
        let mut registry = Registry::in_memory();
        registry
            .upsert_controller(ControllerSpec { id: Some("c1".into()), ..Default::default() })
            .unwrap();
        registry
            .upsert_driver(DriverSpec {
                id: Some("d".into()),
                controller_id: Some("c1".into()),
                outputs: flags
                    .iter()
                    .map(|&(level, faulty, disabled)| OutputSpec {
                        level: Some(level),
                        faulty: Some(faulty),
                        disabled: Some(disabled),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            })
            .unwrap();
        registry
    }

    pub fn slot_ids(count: usize) -> Vec<String> {
        (0..count).map(|slot| format!("d_slot{slot}")).collect()
    }
}

// ============================================================================
// Persistence Tests
// ============================================================================

mod persistence_tests {
    use super::*;

    #[test]
    fn test_json_store_round_trip_through_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.json");

        let mut registry = Registry::new(JsonFileStore::new(&path));
        registry
            .upsert_controller(ControllerSpec {
                id: Some("c1".into()),
                port: Some("/dev/ttyACM0".into()),
                ..Default::default()
            })
            .unwrap();
        registry.upsert_switch(SwitchSpec {
            id: Some("sw".into()),
            switch: Some(4),
            ..Default::default()
        });
        registry
            .upsert_button(ButtonSpec {
                switch_id: Some("sw".into()),
                mask: 8,
                ..Default::default()
            })
            .unwrap();
        registry.commit().unwrap();

        let reloaded = Registry::load(JsonFileStore::new(&path)).unwrap();
        assert_eq!(reloaded.data(), registry.data());
        assert_eq!(
            reloaded.controller("c1").unwrap().port.as_deref(),
            Some("/dev/ttyACM0")
        );
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(JsonFileStore::new(dir.path().join("absent.json"))).unwrap();
        assert_eq!(registry.controllers().count(), 0);
    }
}

// ============================================================================
// Group State Tests
// ============================================================================

mod group_state_tests {
    use super::*;

    #[test]
    fn test_shared_faulty_output_keeps_both_groups_on() {
        let mut registry = helpers::fleet(&[(1, false, false), (1, false, false), (0, false, false)]);
        for (id, members) in [("a", ["d_slot0", "d_slot2"]), ("b", ["d_slot1", "d_slot2"])] {
            registry.upsert_group(GroupSpec {
                id: Some(id.into()),
                led_ids: Some(members.map(String::from).to_vec()),
                ..Default::default()
            });
        }

        registry.output_mut("d_slot2").unwrap().faulty = true;
        let flipped = registry.refresh_group_states(&BTreeSet::from(["d_slot2".to_string()]));
        assert_eq!(flipped, BTreeSet::from(["a".to_string(), "b".to_string()]));

        registry.output_mut("d_slot2").unwrap().faulty = false;
        let flipped = registry.refresh_group_states(&BTreeSet::from(["d_slot2".to_string()]));
        assert_eq!(flipped.len(), 2);
        assert!(!registry.group("a").unwrap().is_on);
    }

    #[test]
    fn test_group_of_only_disabled_outputs_is_off() {
        let mut registry = helpers::fleet(&[(0, false, true), (0, false, true)]);
        let group = registry.upsert_group(GroupSpec {
            id: Some("g".into()),
            led_ids: Some(helpers::slot_ids(2)),
            is_on: Some(true),
            ..Default::default()
        });
        assert!(!registry.derive_group_on(&group));
    }
}

// ============================================================================
// Metrics Tests
// ============================================================================

mod metrics_tests {
    use super::*;

    #[test]
    fn test_metrics_without_status_are_zero() {
        let registry = helpers::fleet(&[(1, false, false)]);
        let metrics = MetricsSnapshot::from_registry(&registry);
        assert_eq!(metrics.totals.power, 0.0);
        assert_eq!(metrics.totals.voltage, 0.0);
        assert_eq!(metrics.controllers[0].led_total, 4);
        assert_eq!(metrics.controllers[0].led_on, 1);
        assert!(metrics.sensors.is_empty());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn output_flags() -> impl Strategy<Value = (i64, bool, bool)> {
        (0i64..2, any::<bool>(), any::<bool>())
    }

    fn pwm_range() -> impl Strategy<Value = (i64, i64)> {
        (0i64..=255, 0i64..=255).prop_map(|(a, b)| (a.min(b), a.max(b)))
    }

    proptest! {
        #[test]
        fn group_on_iff_enabled_members_accounted_for(
            flags in prop::collection::vec(output_flags(), 1..=4)
        ) {
            let mut registry = helpers::fleet(&flags);
            let group = registry.upsert_group(GroupSpec {
                id: Some("g".into()),
                led_ids: Some(helpers::slot_ids(flags.len())),
                ..Default::default()
            });

            let enabled: Vec<_> = flags.iter().filter(|(_, _, disabled)| !disabled).collect();
            let expected = !enabled.is_empty()
                && enabled.iter().all(|(level, faulty, _)| *level > 0 || *faulty);
            prop_assert_eq!(registry.derive_group_on(&group), expected);
        }

        #[test]
        fn pwm_map_hits_range_bounds(
            ranges in prop::collection::vec(pwm_range(), 4),
            at_full in any::<bool>()
        ) {
            let mut registry = Registry::in_memory();
            registry
                .upsert_driver(DriverSpec {
                    id: Some("d".into()),
                    controller_id: Some("c1".into()),
                    outputs: ranges
                        .iter()
                        .take(3)
                        .map(|&(min, max)| OutputSpec {
                            min_pwm: Some(min),
                            max_pwm: Some(max),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                })
                .unwrap();
            registry.upsert_group(GroupSpec {
                id: Some("g".into()),
                led_ids: Some(helpers::slot_ids(3)),
                ..Default::default()
            });

            let brightness = if at_full { 100 } else { 0 };
            let map = registry.build_group_pwm_map("g", MapFilter::default(), Some(brightness));
            let slots = map["c1"][&0];
            for (slot, &(min, max)) in ranges.iter().take(3).enumerate() {
                prop_assert_eq!(slots[slot], if at_full { max } else { min });
            }
            prop_assert_eq!(slots[3], -1);
        }

        #[test]
        fn pwm_map_stays_within_each_range(
            (min, max) in pwm_range(),
            brightness in -50i64..150
        ) {
            let mut registry = helpers::fleet(&[(0, false, false)]);
            registry
                .upsert_driver(DriverSpec {
                    id: Some("d".into()),
                    outputs: vec![OutputSpec {
                        min_pwm: Some(min),
                        max_pwm: Some(max),
                        ..Default::default()
                    }],
                    ..Default::default()
                })
                .unwrap();
            registry.upsert_group(GroupSpec {
                id: Some("g".into()),
                led_ids: Some(helpers::slot_ids(1)),
                ..Default::default()
            });

            let map = registry.build_group_pwm_map("g", MapFilter::default(), Some(brightness));
            let pwm = map["c1"][&0][0];
            prop_assert!(pwm >= min && pwm <= max);
        }
    }
}
