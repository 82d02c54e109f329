// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::{
    AppError, Appointment, CancelledBy, DayOfWeek, PaymentMethod, PaymentRecord, SlotTime,
};

/// Widest window `get_available_slots_in_range` will project in one call.
pub const MAX_AVAILABILITY_RANGE_DAYS: i64 = 14;

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub time_slot_id: Uuid,
    pub appointment_date: NaiveDate,
    /// Falls back to the time slot's examination type when absent.
    pub examination_type: Option<String>,
    pub symptoms: Option<String>,
    pub payment_method: PaymentMethod,
}

impl BookAppointmentRequest {
    /// Shape checks that need no store access.
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(examination_type) = &self.examination_type {
            if examination_type.trim().is_empty() {
                return Err(AppError::ValidationError(
                    "examinationType must not be blank when given".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub cancelled_by: CancelledBy,
    pub cancelled_by_id: Option<Uuid>,
    pub reason: String,
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

/// One open time slot projected onto a concrete date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlot {
    pub slot_id: Uuid,
    pub schedule_id: Uuid,
    pub date: NaiveDate,
    pub day_of_week: DayOfWeek,
    pub start_time: SlotTime,
    pub end_time: SlotTime,
    pub examination_type: String,
    pub max_patients: u32,
    pub remaining: u32,
}

/// What a successful booking commits: the appointment and its linked payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingConfirmation {
    pub appointment: Appointment,
    pub payment: PaymentRecord,
}

impl BookingConfirmation {
    pub fn booked_at(&self) -> DateTime<Utc> {
        self.appointment.created_at
    }
}
