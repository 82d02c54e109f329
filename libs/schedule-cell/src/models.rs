// libs/schedule-cell/src/models.rs
use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::{AppError, DayOfWeek, SlotTime};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// One weekly slot as authored by an admin. Times are raw `HH:mm` strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlotInput {
    pub day_of_week: DayOfWeek,
    pub start_time: String,
    pub end_time: String,
    pub examination_type: String,
    pub max_patients: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub doctor_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
    /// When present, slots must use exactly these weekdays and each must have a slot.
    pub days_of_week: Option<BTreeSet<DayOfWeek>>,
    pub time_slots: Vec<TimeSlotInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScheduleRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub timezone: Option<String>,
    pub days_of_week: Option<BTreeSet<DayOfWeek>>,
    /// Replaces every existing slot when present.
    pub time_slots: Option<Vec<TimeSlotInput>>,
}

// ==============================================================================
// VALIDATION MODELS
// ==============================================================================

/// The part of a slot the overlap rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDefinition {
    pub day_of_week: DayOfWeek,
    pub start_time: SlotTime,
    pub end_time: SlotTime,
}

impl SlotDefinition {
    pub fn new(day_of_week: DayOfWeek, start_time: SlotTime, end_time: SlotTime) -> Self {
        Self { day_of_week, start_time, end_time }
    }
}

/// A `TimeSlotInput` whose fields passed shape validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTimeSlot {
    pub definition: SlotDefinition,
    pub examination_type: String,
    pub max_patients: u32,
}

impl TimeSlotInput {
    pub fn parse(&self) -> Result<ParsedTimeSlot, AppError> {
        let start_time: SlotTime = self.start_time.parse()?;
        let end_time: SlotTime = self.end_time.parse()?;

        if self.max_patients < 1 {
            return Err(AppError::ValidationError(format!(
                "maxPatients must be at least 1 for {} {}-{}",
                self.day_of_week, self.start_time, self.end_time
            )));
        }

        let examination_type = self.examination_type.trim();
        if examination_type.is_empty() {
            return Err(AppError::ValidationError(format!(
                "examinationType is required for {} {}-{}",
                self.day_of_week, self.start_time, self.end_time
            )));
        }

        Ok(ParsedTimeSlot {
            definition: SlotDefinition::new(self.day_of_week, start_time, end_time),
            examination_type: examination_type.to_string(),
            max_patients: self.max_patients,
        })
    }
}
