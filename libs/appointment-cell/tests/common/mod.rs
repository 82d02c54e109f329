// libs/appointment-cell/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use appointment_cell::{
    AppointmentLifecycleService, AvailabilityResolver, BookAppointmentRequest, BookingCoordinator,
    CancelAppointmentRequest,
};
use shared_config::SchedulingConfig;
use shared_database::InMemoryStore;
use shared_models::{CancelledBy, DayOfWeek, DoctorProfile, PaymentMethod, Schedule, TimeSlot};
use shared_utils::test_utils::{next_weekday, seed_schedule, utc, ScheduleBuilder, TestDoctor};
use shared_utils::{Clock, FixedClock};

pub const CONSULTATION_FEE: i64 = 150_000;

/// A seeded store with one active doctor and one four-week schedule:
/// MONDAY 08:00-11:30, MONDAY 13:00-16:00 and WEDNESDAY 13:00-16:00.
pub struct BookingFixture {
    pub store: Arc<InMemoryStore>,
    pub clock: FixedClock,
    pub config: SchedulingConfig,
    pub doctor: DoctorProfile,
    pub schedule: Schedule,
    pub coordinator: Arc<BookingCoordinator<InMemoryStore>>,
    pub lifecycle: AppointmentLifecycleService<InMemoryStore>,
    pub availability: AvailabilityResolver<InMemoryStore>,
}

impl BookingFixture {
    pub async fn new() -> Self {
        Self::with_capacity(15).await
    }

    pub async fn with_capacity(max_patients: u32) -> Self {
        // Monday 2024-12-16, 09:00 UTC
        let clock = FixedClock::new(utc(2024, 12, 16, 9, 0));
        let config = SchedulingConfig::default();
        let store = Arc::new(InMemoryStore::new());

        let doctor = TestDoctor::active(CONSULTATION_FEE);
        store.upsert_doctor(doctor.clone()).unwrap();

        let today = clock.today();
        let schedule = ScheduleBuilder::new(doctor.id, today, today + Duration::days(27))
            .slot(DayOfWeek::Monday, "08:00", "11:30", max_patients)
            .slot(DayOfWeek::Monday, "13:00", "16:00", 10)
            .slot(DayOfWeek::Wednesday, "13:00", "16:00", 10)
            .build();
        seed_schedule(&store, &schedule).await.unwrap();

        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let coordinator = Arc::new(BookingCoordinator::new(
            Arc::clone(&store),
            store.clone(),
            Arc::clone(&shared_clock),
            &config,
        ));
        let lifecycle = AppointmentLifecycleService::new(Arc::clone(&store), Arc::clone(&shared_clock), &config);
        let availability = AvailabilityResolver::new(Arc::clone(&store), &config);

        Self { store, clock, config, doctor, schedule, coordinator, lifecycle, availability }
    }

    pub fn monday_slot(&self) -> &TimeSlot {
        slot_at(&self.schedule, DayOfWeek::Monday, "08:00")
    }

    pub fn monday_afternoon_slot(&self) -> &TimeSlot {
        slot_at(&self.schedule, DayOfWeek::Monday, "13:00")
    }

    pub fn wednesday_slot(&self) -> &TimeSlot {
        slot_at(&self.schedule, DayOfWeek::Wednesday, "13:00")
    }

    pub fn next(&self, day: DayOfWeek) -> NaiveDate {
        next_weekday(self.clock.today(), day)
    }

    pub fn request(&self, patient_id: Uuid, slot: &TimeSlot, date: NaiveDate) -> BookAppointmentRequest {
        BookAppointmentRequest {
            patient_id,
            doctor_id: self.doctor.id,
            time_slot_id: slot.id,
            appointment_date: date,
            examination_type: None,
            symptoms: Some("persistent cough".to_string()),
            payment_method: PaymentMethod::BankTransfer,
        }
    }
}

pub fn slot_at<'a>(schedule: &'a Schedule, day: DayOfWeek, start: &str) -> &'a TimeSlot {
    schedule
        .time_slots
        .iter()
        .find(|slot| slot.day_of_week == day && slot.start_time.to_string() == start)
        .unwrap_or_else(|| panic!("fixture schedule has no {} slot at {}", day, start))
}

pub fn patient_cancellation(reason: &str) -> CancelAppointmentRequest {
    CancelAppointmentRequest {
        cancelled_by: CancelledBy::Patient,
        cancelled_by_id: None,
        reason: reason.to_string(),
    }
}
