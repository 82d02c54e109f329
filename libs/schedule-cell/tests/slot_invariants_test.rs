// libs/schedule-cell/tests/slot_invariants_test.rs
//
// Property checks for the slot overlap rules.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use schedule_cell::{SlotDefinition, SlotOverlapValidator};
use shared_models::{DayOfWeek, SlotTime};

fn day_strategy() -> impl Strategy<Value = DayOfWeek> {
    prop::sample::select(DayOfWeek::ALL.to_vec())
}

/// Whole quarter hours between 00:00 and 23:45.
fn slot_strategy() -> impl Strategy<Value = SlotDefinition> {
    (day_strategy(), 0u32..96, 1u32..16).prop_map(|(day, start_q, len_q)| {
        let start = start_q * 15;
        let end = (start + len_q * 15).min(23 * 60 + 59);
        SlotDefinition::new(
            day,
            SlotTime::new(start / 60, start % 60).unwrap(),
            SlotTime::new(end / 60, end % 60).unwrap(),
        )
    })
}

fn pairwise_disjoint(slots: &[SlotDefinition]) -> bool {
    for (i, a) in slots.iter().enumerate() {
        for b in &slots[i + 1..] {
            if a.day_of_week == b.day_of_week && a.start_time < b.end_time && b.start_time < a.end_time {
                return false;
            }
        }
    }
    true
}

proptest! {
    #[test]
    fn accepted_sets_never_overlap(slots in prop::collection::vec(slot_strategy(), 0..8)) {
        let well_formed = slots.iter().all(|slot| slot.start_time < slot.end_time);
        let accepted = SlotOverlapValidator::validate(&slots, None).is_ok();

        prop_assert_eq!(accepted, well_formed && pairwise_disjoint(&slots));
    }

    #[test]
    fn validation_ignores_input_order(mut slots in prop::collection::vec(slot_strategy(), 0..8)) {
        let forward = SlotOverlapValidator::validate(&slots, None).is_ok();
        slots.reverse();
        prop_assert_eq!(forward, SlotOverlapValidator::validate(&slots, None).is_ok());
    }

    #[test]
    fn coverage_matches_calendar(
        slots in prop::collection::vec(slot_strategy(), 1..6),
        offset in 0i64..365,
        span in 0i64..10,
    ) {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset);
        let end = start + Duration::days(span);

        let every_day_occurs = slots.iter().all(|slot| {
            (0..=span).any(|d| DayOfWeek::from_date(start + Duration::days(d)) == slot.day_of_week)
        });

        prop_assert_eq!(
            SlotOverlapValidator::validate_coverage(&slots, start, end).is_ok(),
            every_day_occurs
        );
    }
}
