// libs/schedule-cell/src/services/overlap.rs
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use shared_models::{weekdays_in_range, AppError, DayOfWeek};

use crate::models::SlotDefinition;

/// Rejects malformed or mutually overlapping slot definitions within one schedule.
pub struct SlotOverlapValidator;

impl SlotOverlapValidator {
    /// Checks slot shape, the optional declared weekday set, and same-day overlaps.
    ///
    /// Intervals are half-open, so a slot ending at 10:00 and one starting at
    /// 10:00 on the same day do not conflict.
    pub fn validate(
        slots: &[SlotDefinition],
        allowed_days: Option<&BTreeSet<DayOfWeek>>,
    ) -> Result<(), AppError> {
        debug!("Validating {} time slot definitions", slots.len());

        // **Step 1: Every slot must start before it ends**
        if let Some(bad) = slots.iter().find(|slot| slot.start_time >= slot.end_time) {
            return Err(AppError::BusinessRuleViolation(format!(
                "TimeSlot on {} must start before it ends ({} >= {})",
                bad.day_of_week, bad.start_time, bad.end_time
            )));
        }

        // **Step 2: Declared weekdays, when the caller gave them**
        if let Some(allowed) = allowed_days {
            if let Some(outside) = slots.iter().find(|slot| !allowed.contains(&slot.day_of_week)) {
                return Err(AppError::BusinessRuleViolation(format!(
                    "TimeSlot {}-{} uses {} which is not one of the schedule's days",
                    outside.start_time, outside.end_time, outside.day_of_week
                )));
            }

            let used: BTreeSet<DayOfWeek> = slots.iter().map(|slot| slot.day_of_week).collect();
            let empty: Vec<String> = allowed.difference(&used).map(|day| day.to_string()).collect();
            if !empty.is_empty() {
                return Err(AppError::BusinessRuleViolation(format!(
                    "Schedule days without any time slot: {}",
                    empty.join(", ")
                )));
            }
        }

        // **Step 3: Group by weekday, sort by start, compare neighbours**
        let mut by_day: BTreeMap<DayOfWeek, Vec<&SlotDefinition>> = BTreeMap::new();
        for slot in slots {
            by_day.entry(slot.day_of_week).or_default().push(slot);
        }

        for (day, mut group) in by_day {
            group.sort_by_key(|slot| (slot.start_time, slot.end_time));

            for pair in group.windows(2) {
                let (current, next) = (pair[0], pair[1]);
                if current.end_time > next.start_time {
                    warn!(
                        "Overlapping slots on {}: {}-{} and {}-{}",
                        day, current.start_time, current.end_time, next.start_time, next.end_time
                    );
                    return Err(AppError::BusinessRuleViolation(format!(
                        "TimeSlot overlap on {}: {}-{} overlaps {}-{}",
                        day, current.start_time, current.end_time, next.start_time, next.end_time
                    )));
                }
            }
        }

        Ok(())
    }

    /// Every weekday a slot uses must occur at least once in `[start_date, end_date]`.
    pub fn validate_coverage(
        slots: &[SlotDefinition],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<(), AppError> {
        if start_date > end_date {
            return Err(AppError::ValidationError(format!(
                "startDate {} is after endDate {}",
                start_date, end_date
            )));
        }

        let covered = weekdays_in_range(start_date, end_date);
        let missing: BTreeSet<DayOfWeek> = slots
            .iter()
            .map(|slot| slot.day_of_week)
            .filter(|day| !covered.contains(day))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = missing.iter().map(|day| day.to_string()).collect();
        Err(AppError::BusinessRuleViolation(format!(
            "{} never occurs between {} and {}",
            names.join(", "),
            start_date,
            end_date
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn slot(day: DayOfWeek, start: &str, end: &str) -> SlotDefinition {
        SlotDefinition::new(day, start.parse().unwrap(), end.parse().unwrap())
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn back_to_back_slots_are_allowed() {
        let slots = vec![
            slot(DayOfWeek::Monday, "10:00", "11:30"),
            slot(DayOfWeek::Monday, "08:00", "10:00"),
            slot(DayOfWeek::Monday, "13:00", "17:00"),
        ];
        assert!(SlotOverlapValidator::validate(&slots, None).is_ok());
    }

    #[test]
    fn overlap_names_both_slots() {
        let slots = vec![
            slot(DayOfWeek::Monday, "08:00", "10:00"),
            slot(DayOfWeek::Monday, "09:30", "11:00"),
        ];
        let err = SlotOverlapValidator::validate(&slots, None).unwrap_err();
        assert_eq!(
            err,
            AppError::BusinessRuleViolation(
                "TimeSlot overlap on MONDAY: 08:00-10:00 overlaps 09:30-11:00".to_string()
            )
        );
    }

    #[test]
    fn same_times_on_different_days_do_not_conflict() {
        let slots = vec![
            slot(DayOfWeek::Monday, "08:00", "11:30"),
            slot(DayOfWeek::Tuesday, "08:00", "11:30"),
        ];
        assert!(SlotOverlapValidator::validate(&slots, None).is_ok());
    }

    #[test]
    fn empty_or_inverted_interval_is_rejected() {
        let inverted = vec![slot(DayOfWeek::Friday, "11:00", "09:00")];
        assert_matches!(
            SlotOverlapValidator::validate(&inverted, None),
            Err(AppError::BusinessRuleViolation(msg)) if msg.contains("must start before it ends")
        );

        let empty = vec![slot(DayOfWeek::Friday, "09:00", "09:00")];
        assert!(SlotOverlapValidator::validate(&empty, None).is_err());
    }

    #[test]
    fn declared_days_must_match_slots() {
        let allowed: BTreeSet<_> = [DayOfWeek::Monday, DayOfWeek::Wednesday].into_iter().collect();

        let outside = vec![
            slot(DayOfWeek::Monday, "08:00", "11:30"),
            slot(DayOfWeek::Wednesday, "08:00", "11:30"),
            slot(DayOfWeek::Thursday, "08:00", "11:30"),
        ];
        assert_matches!(
            SlotOverlapValidator::validate(&outside, Some(&allowed)),
            Err(AppError::BusinessRuleViolation(msg)) if msg.contains("THURSDAY")
        );

        let missing_wednesday = vec![slot(DayOfWeek::Monday, "08:00", "11:30")];
        assert_matches!(
            SlotOverlapValidator::validate(&missing_wednesday, Some(&allowed)),
            Err(AppError::BusinessRuleViolation(msg)) if msg.contains("WEDNESDAY")
        );
    }

    #[test]
    fn coverage_requires_weekday_inside_range() {
        // Mon 2024-12-16 .. Wed 2024-12-18
        let slots = vec![slot(DayOfWeek::Friday, "08:00", "11:30")];
        assert_matches!(
            SlotOverlapValidator::validate_coverage(&slots, date("2024-12-16"), date("2024-12-18")),
            Err(AppError::BusinessRuleViolation(msg)) if msg.starts_with("FRIDAY never occurs")
        );

        let monday = vec![slot(DayOfWeek::Monday, "08:00", "11:30")];
        assert!(SlotOverlapValidator::validate_coverage(&monday, date("2024-12-16"), date("2024-12-18")).is_ok());
    }

    #[test]
    fn coverage_rejects_inverted_range() {
        let slots = vec![slot(DayOfWeek::Monday, "08:00", "11:30")];
        assert_matches!(
            SlotOverlapValidator::validate_coverage(&slots, date("2024-12-20"), date("2024-12-16")),
            Err(AppError::ValidationError(_))
        );
    }
}
