// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulingConfig;
use shared_database::{DoctorLookup, IsolationLevel, SchedulingStore};
use shared_models::{
    AppError, Appointment, AppointmentStatus, ConflictKind, DayOfWeek, DoctorProfile,
    PaymentRecord, PaymentStatus, Schedule, TimeSlot,
};
use shared_utils::Clock;

use crate::models::{BookAppointmentRequest, BookingConfirmation};
use crate::services::sequence::SequenceCodeGenerator;
use crate::services::side_effects::SideEffectDispatcher;

/// Validates a booking against doctor, schedule and capacity rules, then commits
/// the appointment and its payment record in one serializable unit of work.
pub struct BookingCoordinator<S: SchedulingStore> {
    store: Arc<S>,
    doctors: Arc<dyn DoctorLookup>,
    clock: Arc<dyn Clock>,
    codes: SequenceCodeGenerator,
    side_effects: SideEffectDispatcher,
    min_lead: ChronoDuration,
    max_ahead: ChronoDuration,
    tx_timeout: Duration,
    max_commit_attempts: u32,
}

impl<S: SchedulingStore> BookingCoordinator<S> {
    pub fn new(
        store: Arc<S>,
        doctors: Arc<dyn DoctorLookup>,
        clock: Arc<dyn Clock>,
        config: &SchedulingConfig,
    ) -> Self {
        Self {
            store,
            doctors,
            clock,
            codes: SequenceCodeGenerator::new(config.payment_code_prefix.clone()),
            side_effects: SideEffectDispatcher::new(),
            min_lead: ChronoDuration::minutes(config.min_booking_lead_minutes_bounded()),
            max_ahead: ChronoDuration::days(config.max_booking_ahead_days_bounded()),
            tx_timeout: config.transaction_timeout(),
            max_commit_attempts: config.max_commit_attempts.max(1),
        }
    }

    pub fn with_side_effects(mut self, side_effects: SideEffectDispatcher) -> Self {
        self.side_effects = side_effects;
        self
    }

    #[instrument(skip(self, request), fields(patient_id = %request.patient_id, doctor_id = %request.doctor_id, date = %request.appointment_date))]
    pub async fn book_appointment(&self, request: BookAppointmentRequest) -> Result<BookingConfirmation, AppError> {
        info!("Booking slot {} on {} for patient {}",
              request.time_slot_id, request.appointment_date, request.patient_id);

        request.validate()?;
        let now = self.clock.now();

        // **Step 1: Booking window**
        self.validate_booking_window(request.appointment_date, now)?;

        // **Step 2: Doctor state**
        let doctor = self.load_bookable_doctor(request.doctor_id).await?;

        // **Steps 3-6: Slot, weekday, capacity and duplicate checks against a snapshot**
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted, self.tx_timeout).await?;
        let precheck = self.validate_against_store(&mut tx, &request).await;
        self.store.rollback(tx).await;
        precheck?;

        // **Step 7: Atomic commit, retried only when the payment code collides**
        let mut attempt = 1;
        let confirmation = loop {
            match self.commit_booking(&request, &doctor, now).await {
                Ok(confirmation) => break confirmation,
                Err(e) if e.conflict_kind() == Some(ConflictKind::CodeCollision) && attempt < self.max_commit_attempts => {
                    warn!("Payment code collided on attempt {} of {}, retrying", attempt, self.max_commit_attempts);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        info!("Appointment {} booked with payment code {}",
              confirmation.appointment.id, confirmation.payment.code);

        if !self.side_effects.is_empty() {
            self.side_effects.dispatch(&confirmation);
        }

        Ok(confirmation)
    }

    // ==============================================================================
    // VALIDATION STEPS
    // ==============================================================================

    /// The appointment day, taken at 00:00 UTC, must sit between `now + min_lead`
    /// and `now + max_ahead`.
    fn validate_booking_window(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<(), AppError> {
        let day_start = date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        let Some(day_start) = day_start else {
            return Err(AppError::ValidationError(format!("Invalid appointment date {}", date)));
        };

        let earliest = now + self.min_lead;
        let latest = now + self.max_ahead;

        if day_start < earliest {
            return Err(AppError::BusinessRuleViolation(format!(
                "booking window: {} is less than {} minutes from now",
                date,
                self.min_lead.num_minutes()
            )));
        }
        if day_start > latest {
            return Err(AppError::BusinessRuleViolation(format!(
                "booking window: {} is more than {} days ahead",
                date,
                self.max_ahead.num_days()
            )));
        }
        Ok(())
    }

    async fn load_bookable_doctor(&self, doctor_id: Uuid) -> Result<DoctorProfile, AppError> {
        let doctor = self
            .doctors
            .find_doctor(doctor_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Doctor {} not found", doctor_id)))?;

        if doctor.is_deleted() {
            return Err(AppError::NotFound(format!("Doctor {} not found", doctor_id)));
        }
        if !doctor.accepts_bookings() {
            return Err(AppError::BusinessRuleViolation(format!(
                "Doctor {} is not accepting bookings (status {:?})",
                doctor_id, doctor.status
            )));
        }

        debug!("Doctor {} accepts bookings at fee {}", doctor_id, doctor.consultation_fee);
        Ok(doctor)
    }

    /// Steps 3 to 6. Called once against a snapshot and again inside the commit.
    async fn validate_against_store(
        &self,
        tx: &mut S::Tx,
        request: &BookAppointmentRequest,
    ) -> Result<(Schedule, TimeSlot), AppError> {
        let date = request.appointment_date;

        let schedule = self
            .store
            .find_schedule_by_slot(tx, request.time_slot_id)
            .await?
            .filter(|schedule| schedule.doctor_id == request.doctor_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "TimeSlot {} not found for doctor {}",
                    request.time_slot_id, request.doctor_id
                ))
            })?;

        if !schedule.is_active {
            return Err(AppError::BusinessRuleViolation(format!(
                "Schedule {} is not active",
                schedule.id
            )));
        }
        if !schedule.covers(date) {
            return Err(AppError::BusinessRuleViolation(format!(
                "{} is outside schedule {} ({} to {})",
                date, schedule.id, schedule.start_date, schedule.end_date
            )));
        }

        let slot = schedule
            .slot(request.time_slot_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("TimeSlot {} not found", request.time_slot_id)))?;

        let weekday = DayOfWeek::from_date(date);
        if weekday != slot.day_of_week {
            return Err(AppError::BusinessRuleViolation(format!(
                "{} falls on {} but time slot {} runs on {}",
                date, weekday, slot.id, slot.day_of_week
            )));
        }

        let taken = self.store.count_non_terminal(tx, slot.id, date).await?;
        if taken >= slot.max_patients {
            return Err(AppError::conflict(
                ConflictKind::SlotFull,
                format!("slot full: {} of {} places taken on {}", taken, slot.max_patients, date),
            ));
        }

        if let Some(existing) = self
            .store
            .find_non_terminal(tx, request.patient_id, request.doctor_id, date)
            .await?
        {
            return Err(AppError::conflict(
                ConflictKind::DuplicateBooking,
                format!(
                    "duplicate booking: patient already holds appointment {} with this doctor on {}",
                    existing.id, date
                ),
            ));
        }

        Ok((schedule, slot))
    }

    // ==============================================================================
    // COMMIT
    // ==============================================================================

    async fn commit_booking(
        &self,
        request: &BookAppointmentRequest,
        doctor: &DoctorProfile,
        now: DateTime<Utc>,
    ) -> Result<BookingConfirmation, AppError> {
        let mut tx = self.store.begin(IsolationLevel::Serializable, self.tx_timeout).await?;

        match self.write_booking(&mut tx, request, doctor, now).await {
            Ok(confirmation) => {
                self.store.commit(tx).await?;
                Ok(confirmation)
            }
            Err(e) => {
                self.store.rollback(tx).await;
                Err(e)
            }
        }
    }

    async fn write_booking(
        &self,
        tx: &mut S::Tx,
        request: &BookAppointmentRequest,
        doctor: &DoctorProfile,
        now: DateTime<Utc>,
    ) -> Result<BookingConfirmation, AppError> {
        let (schedule, slot) = self.validate_against_store(tx, request).await?;

        let examination_type = request
            .examination_type
            .as_deref()
            .map(str::trim)
            .map(str::to_string)
            .unwrap_or_else(|| slot.examination_type.clone());

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            schedule_id: schedule.id,
            time_slot_id: slot.id,
            appointment_date: request.appointment_date,
            status: AppointmentStatus::Pending,
            examination_type,
            symptoms: request.symptoms.clone(),
            consultation_fee: doctor.consultation_fee,
            cancelled_by: None,
            cancelled_by_id: None,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_appointment(tx, &appointment).await?;

        let code = self.codes.next_code(self.store.as_ref(), tx, now.date_naive()).await?;
        let payment = PaymentRecord {
            id: Uuid::new_v4(),
            appointment_id: appointment.id,
            code,
            amount: doctor.consultation_fee,
            status: PaymentStatus::Pending,
            method: request.payment_method,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(tx, &payment).await?;

        Ok(BookingConfirmation { appointment, payment })
    }
}
