// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::SchedulingConfig;
use shared_database::{AppointmentRepository, IsolationLevel, ScheduleStore};
use shared_models::{AppError, DayOfWeek};

use crate::models::{AvailableSlot, MAX_AVAILABILITY_RANGE_DAYS};

/// Projects weekly time slots onto calendar dates with their remaining capacity.
///
/// Read-only. Runs at read-committed isolation; the numbers it returns are
/// advisory and the booking transaction re-counts before committing.
pub struct AvailabilityResolver<S>
where
    S: ScheduleStore + AppointmentRepository,
{
    store: Arc<S>,
    tx_timeout: Duration,
}

impl<S> AvailabilityResolver<S>
where
    S: ScheduleStore + AppointmentRepository,
{
    pub fn new(store: Arc<S>, config: &SchedulingConfig) -> Self {
        Self {
            store,
            tx_timeout: config.transaction_timeout(),
        }
    }

    pub async fn get_available_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<AvailableSlot>, AppError> {
        self.get_available_slots_in_range(doctor_id, date, date).await
    }

    /// Open slots for every date in `[start_date, end_date]`, ordered by date then start time.
    pub async fn get_available_slots_in_range(
        &self,
        doctor_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<AvailableSlot>, AppError> {
        if start_date > end_date {
            return Err(AppError::ValidationError(format!(
                "start date {} is after end date {}",
                start_date, end_date
            )));
        }
        let days = (end_date - start_date).num_days() + 1;
        if days > MAX_AVAILABILITY_RANGE_DAYS {
            return Err(AppError::ValidationError(format!(
                "availability range covers {} days, at most {} allowed",
                days, MAX_AVAILABILITY_RANGE_DAYS
            )));
        }

        debug!("Resolving availability for doctor {} from {} to {}", doctor_id, start_date, end_date);

        let mut tx = self.store.begin(IsolationLevel::ReadCommitted, self.tx_timeout).await?;
        let mut open = Vec::new();
        for offset in 0..days {
            let date = start_date + ChronoDuration::days(offset);
            match self.resolve_date(&mut tx, doctor_id, date).await {
                Ok(mut slots) => open.append(&mut slots),
                Err(e) => {
                    self.store.rollback(tx).await;
                    return Err(e);
                }
            }
        }
        self.store.rollback(tx).await;

        info!("Found {} open slots for doctor {} between {} and {}", open.len(), doctor_id, start_date, end_date);
        Ok(open)
    }

    async fn resolve_date(
        &self,
        tx: &mut S::Tx,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailableSlot>, AppError> {
        let weekday = DayOfWeek::from_date(date);
        let schedules = self
            .store
            .find_active_by_doctor_covering_date(tx, doctor_id, date)
            .await?;

        let mut open = Vec::new();
        for schedule in &schedules {
            for slot in schedule.time_slots.iter().filter(|slot| slot.day_of_week == weekday) {
                let taken = self.store.count_non_terminal(tx, slot.id, date).await?;
                let remaining = slot.max_patients.saturating_sub(taken);
                if remaining == 0 {
                    continue;
                }

                open.push(AvailableSlot {
                    slot_id: slot.id,
                    schedule_id: schedule.id,
                    date,
                    day_of_week: weekday,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    examination_type: slot.examination_type.clone(),
                    max_patients: slot.max_patients,
                    remaining,
                });
            }
        }

        open.sort_by_key(|slot| (slot.start_time, slot.end_time));
        Ok(open)
    }
}
