// libs/schedule-cell/src/services/schedule.rs
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::SchedulingConfig;
use shared_database::{AppointmentRepository, IsolationLevel, ScheduleStore};
use shared_models::{AppError, DayOfWeek, Schedule, TimeSlot};
use shared_utils::Clock;

use crate::models::{CreateScheduleRequest, ParsedTimeSlot, SlotDefinition, TimeSlotInput, UpdateScheduleRequest};
use crate::services::conflict::ScheduleConflictChecker;
use crate::services::overlap::SlotOverlapValidator;

const DEFAULT_TIMEZONE: &str = "UTC";

/// Admin-side authoring of schedules. Every write is gated by the overlap
/// validator and the conflict checker inside one serializable unit of work.
pub struct ScheduleService<S>
where
    S: ScheduleStore + AppointmentRepository,
{
    store: Arc<S>,
    conflict_checker: ScheduleConflictChecker<S>,
    clock: Arc<dyn Clock>,
    tx_timeout: Duration,
}

impl<S> ScheduleService<S>
where
    S: ScheduleStore + AppointmentRepository,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &SchedulingConfig) -> Self {
        Self {
            conflict_checker: ScheduleConflictChecker::new(Arc::clone(&store)),
            store,
            clock,
            tx_timeout: config.transaction_timeout(),
        }
    }

    pub async fn create_schedule(&self, request: CreateScheduleRequest) -> Result<Schedule, AppError> {
        info!("Creating schedule for doctor {} from {} to {}",
              request.doctor_id, request.start_date, request.end_date);

        let parsed = parse_slots(&request.time_slots)?;
        validate_slots(&parsed, request.days_of_week.as_ref(), request.start_date, request.end_date)?;

        let now = self.clock.now();
        let schedule_id = Uuid::new_v4();
        let schedule = Schedule {
            id: schedule_id,
            doctor_id: request.doctor_id,
            start_date: request.start_date,
            end_date: request.end_date,
            timezone: normalize_timezone(request.timezone.as_deref())?,
            is_active: request.is_active.unwrap_or(true),
            time_slots: build_slots(schedule_id, parsed),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut tx = self.store.begin(IsolationLevel::Serializable, self.tx_timeout).await?;
        let result = self.insert_checked(&mut tx, &schedule).await;
        self.finish(tx, result).await?;

        info!("Schedule {} created with {} time slots", schedule.id, schedule.time_slots.len());
        Ok(schedule)
    }

    pub async fn update_schedule(
        &self,
        schedule_id: Uuid,
        request: UpdateScheduleRequest,
    ) -> Result<Schedule, AppError> {
        debug!("Updating schedule {}", schedule_id);

        let replacement = match &request.time_slots {
            Some(inputs) => Some(parse_slots(inputs)?),
            None => None,
        };

        let mut tx = self.store.begin(IsolationLevel::Serializable, self.tx_timeout).await?;
        let result = self.update_in_tx(&mut tx, schedule_id, request, replacement).await;
        let updated = self.finish(tx, result).await?;

        info!("Schedule {} updated", schedule_id);
        Ok(updated)
    }

    /// Tombstones the schedule. Refused while it still has upcoming bookings.
    pub async fn delete_schedule(&self, schedule_id: Uuid) -> Result<(), AppError> {
        debug!("Deleting schedule {}", schedule_id);

        let mut tx = self.store.begin(IsolationLevel::Serializable, self.tx_timeout).await?;
        let result = self.delete_in_tx(&mut tx, schedule_id).await;
        self.finish(tx, result).await?;

        info!("Schedule {} deleted", schedule_id);
        Ok(())
    }

    /// Re-activation runs the conflict check again; deactivation only stops new bookings.
    pub async fn set_active(&self, schedule_id: Uuid, is_active: bool) -> Result<Schedule, AppError> {
        debug!("Setting schedule {} active={}", schedule_id, is_active);

        let mut tx = self.store.begin(IsolationLevel::Serializable, self.tx_timeout).await?;
        let result = self.set_active_in_tx(&mut tx, schedule_id, is_active).await;
        self.finish(tx, result).await
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> Result<Schedule, AppError> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted, self.tx_timeout).await?;
        let result = self.load(&mut tx, schedule_id).await;
        self.finish(tx, result).await
    }

    // ==============================================================================
    // TRANSACTION BODIES
    // ==============================================================================

    async fn insert_checked(&self, tx: &mut S::Tx, schedule: &Schedule) -> Result<(), AppError> {
        if schedule.is_active {
            self.conflict_checker
                .check(tx, schedule.doctor_id, schedule.start_date, schedule.end_date, &schedule.weekdays(), None)
                .await?;
        }
        self.store.insert_schedule(tx, schedule).await?;
        Ok(())
    }

    async fn update_in_tx(
        &self,
        tx: &mut S::Tx,
        schedule_id: Uuid,
        request: UpdateScheduleRequest,
        replacement: Option<Vec<ParsedTimeSlot>>,
    ) -> Result<Schedule, AppError> {
        let existing = self.load(tx, schedule_id).await?;

        let start_date = request.start_date.unwrap_or(existing.start_date);
        let end_date = request.end_date.unwrap_or(existing.end_date);
        let reshaped = replacement.is_some() || start_date != existing.start_date || end_date != existing.end_date;

        if reshaped {
            self.ensure_no_upcoming_bookings(tx, &existing, "reshaped").await?;
        }

        let time_slots = match replacement {
            Some(parsed) => {
                validate_slots(&parsed, request.days_of_week.as_ref(), start_date, end_date)?;
                build_slots(existing.id, parsed)
            }
            None => {
                let kept = definitions_of(&existing.time_slots);
                SlotOverlapValidator::validate(&kept, request.days_of_week.as_ref())?;
                SlotOverlapValidator::validate_coverage(&kept, start_date, end_date)?;
                existing.time_slots.clone()
            }
        };

        let timezone = match request.timezone.as_deref() {
            Some(tz) => normalize_timezone(Some(tz))?,
            None => existing.timezone.clone(),
        };

        let updated = Schedule {
            start_date,
            end_date,
            timezone,
            time_slots,
            updated_at: self.clock.now(),
            ..existing
        };

        if updated.is_active {
            self.conflict_checker
                .check(tx, updated.doctor_id, updated.start_date, updated.end_date, &updated.weekdays(), Some(updated.id))
                .await?;
        }

        self.store.update_schedule(tx, &updated).await?;
        Ok(updated)
    }

    async fn delete_in_tx(&self, tx: &mut S::Tx, schedule_id: Uuid) -> Result<(), AppError> {
        let existing = self.load(tx, schedule_id).await?;
        self.ensure_no_upcoming_bookings(tx, &existing, "deleted").await?;
        self.store.delete_schedule(tx, schedule_id, self.clock.now()).await?;
        Ok(())
    }

    async fn set_active_in_tx(&self, tx: &mut S::Tx, schedule_id: Uuid, is_active: bool) -> Result<Schedule, AppError> {
        let existing = self.load(tx, schedule_id).await?;
        if existing.is_active == is_active {
            return Ok(existing);
        }

        if is_active {
            self.conflict_checker
                .check(tx, existing.doctor_id, existing.start_date, existing.end_date, &existing.weekdays(), Some(existing.id))
                .await?;
        }

        let updated = Schedule {
            is_active,
            updated_at: self.clock.now(),
            ..existing
        };
        self.store.update_schedule(tx, &updated).await?;
        Ok(updated)
    }

    async fn load(&self, tx: &mut S::Tx, schedule_id: Uuid) -> Result<Schedule, AppError> {
        self.store
            .find_schedule(tx, schedule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))
    }

    async fn ensure_no_upcoming_bookings(
        &self,
        tx: &mut S::Tx,
        schedule: &Schedule,
        action: &str,
    ) -> Result<(), AppError> {
        let upcoming = self
            .store
            .count_non_terminal_for_schedule_from(tx, schedule.id, self.clock.today())
            .await?;

        if upcoming > 0 {
            warn!("Schedule {} has {} upcoming appointments, refusing to be {}", schedule.id, upcoming, action);
            return Err(AppError::BusinessRuleViolation(format!(
                "Schedule {} has {} upcoming appointments and cannot be {}",
                schedule.id, upcoming, action
            )));
        }
        Ok(())
    }

    /// Commits on success, rolls back on failure.
    async fn finish<T>(&self, tx: S::Tx, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                self.store.commit(tx).await?;
                Ok(value)
            }
            Err(e) => {
                self.store.rollback(tx).await;
                Err(e)
            }
        }
    }
}

// ==============================================================================
// HELPERS
// ==============================================================================

fn parse_slots(inputs: &[TimeSlotInput]) -> Result<Vec<ParsedTimeSlot>, AppError> {
    if inputs.is_empty() {
        return Err(AppError::ValidationError("A schedule needs at least one time slot".to_string()));
    }
    inputs.iter().map(TimeSlotInput::parse).collect()
}

fn validate_slots(
    parsed: &[ParsedTimeSlot],
    days_of_week: Option<&BTreeSet<DayOfWeek>>,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
) -> Result<(), AppError> {
    let definitions: Vec<SlotDefinition> = parsed.iter().map(|slot| slot.definition).collect();
    SlotOverlapValidator::validate_coverage(&definitions, start_date, end_date)?;
    SlotOverlapValidator::validate(&definitions, days_of_week)
}

fn definitions_of(slots: &[TimeSlot]) -> Vec<SlotDefinition> {
    slots
        .iter()
        .map(|slot| SlotDefinition::new(slot.day_of_week, slot.start_time, slot.end_time))
        .collect()
}

fn build_slots(schedule_id: Uuid, parsed: Vec<ParsedTimeSlot>) -> Vec<TimeSlot> {
    let mut slots: Vec<TimeSlot> = parsed
        .into_iter()
        .map(|slot| TimeSlot {
            id: Uuid::new_v4(),
            schedule_id,
            day_of_week: slot.definition.day_of_week,
            start_time: slot.definition.start_time,
            end_time: slot.definition.end_time,
            examination_type: slot.examination_type,
            max_patients: slot.max_patients,
        })
        .collect();
    slots.sort_by_key(|slot| (slot.day_of_week, slot.start_time));
    slots
}

fn normalize_timezone(timezone: Option<&str>) -> Result<String, AppError> {
    match timezone.map(str::trim) {
        None => Ok(DEFAULT_TIMEZONE.to_string()),
        Some("") => Err(AppError::ValidationError("timezone must not be blank".to_string())),
        Some(tz) if is_timezone_name(tz) => Ok(tz.to_string()),
        Some(tz) => Err(AppError::ValidationError(format!(
            "timezone '{}' is not UTC, a +HH:MM offset or an Area/Location zone name",
            tz
        ))),
    }
}

fn is_timezone_name(tz: &str) -> bool {
    if tz == DEFAULT_TIMEZONE {
        return true;
    }
    if let Some(offset) = tz.strip_prefix(['+', '-']) {
        return is_utc_offset(offset);
    }
    tz.contains('/')
        && tz.split('/').all(|segment| {
            segment.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                && segment.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        })
}

/// `HH:MM` with hours up to 14.
fn is_utc_offset(offset: &str) -> bool {
    let Some((hours, minutes)) = offset.split_once(':') else {
        return false;
    };
    let two_digits = |part: &str| part.len() == 2 && part.chars().all(|c| c.is_ascii_digit());
    if !two_digits(hours) || !two_digits(minutes) {
        return false;
    }
    match (hours.parse::<u32>(), minutes.parse::<u32>()) {
        (Ok(h), Ok(m)) => h <= 14 && m < 60,
        _ => false,
    }
}
