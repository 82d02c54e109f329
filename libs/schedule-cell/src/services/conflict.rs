// libs/schedule-cell/src/services/conflict.rs
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::ScheduleStore;
use shared_models::{AppError, ConflictKind, DayOfWeek};

/// Rejects a schedule that would double-book a doctor's weekdays across overlapping
/// date ranges of two active schedules.
pub struct ScheduleConflictChecker<S: ScheduleStore> {
    store: Arc<S>,
}

impl<S: ScheduleStore> ScheduleConflictChecker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Runs inside the caller's unit of work so the check and the write see the same state.
    pub async fn check(
        &self,
        tx: &mut S::Tx,
        doctor_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        weekdays: &BTreeSet<DayOfWeek>,
        exclude_schedule_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        debug!(
            "Checking schedule conflicts for doctor {} from {} to {} on {} weekdays",
            doctor_id, start_date, end_date, weekdays.len()
        );

        let existing = self
            .store
            .find_active_overlapping(tx, doctor_id, start_date, end_date)
            .await?;

        for schedule in existing {
            if Some(schedule.id) == exclude_schedule_id {
                continue;
            }

            let colliding: Vec<String> = schedule
                .weekdays()
                .intersection(weekdays)
                .map(|day| day.to_string())
                .collect();

            if !colliding.is_empty() {
                warn!(
                    "Schedule conflict for doctor {} with schedule {} on {}",
                    doctor_id, schedule.id, colliding.join(", ")
                );
                return Err(AppError::conflict(
                    ConflictKind::ScheduleOverlap,
                    format!(
                        "overlaps active schedule {} ({} to {}) on {}",
                        schedule.id,
                        schedule.start_date,
                        schedule.end_date,
                        colliding.join(", ")
                    ),
                ));
            }
        }

        Ok(())
    }
}
