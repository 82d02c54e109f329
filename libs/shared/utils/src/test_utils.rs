use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingConfig};
use shared_database::{InMemoryStore, IsolationLevel, ScheduleStore, StoreError, UnitOfWork};
use shared_models::{DayOfWeek, DoctorProfile, DoctorStatus, Schedule, SlotTime, TimeSlot};

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub scheduling: SchedulingConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            scheduling: SchedulingConfig::default(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            scheduling: self.scheduling.clone(),
            booking_webhook_url: None,
            booking_anchor_url: None,
        }
    }
}

pub struct TestDoctor;

impl TestDoctor {
    pub fn active(consultation_fee: i64) -> DoctorProfile {
        DoctorProfile {
            id: Uuid::new_v4(),
            status: DoctorStatus::Active,
            consultation_fee,
            deleted_at: None,
        }
    }

    pub fn with_status(status: DoctorStatus) -> DoctorProfile {
        DoctorProfile {
            status,
            ..Self::active(150_000)
        }
    }

    pub fn soft_deleted() -> DoctorProfile {
        DoctorProfile {
            deleted_at: Some(Utc::now()),
            ..Self::active(150_000)
        }
    }
}

/// Builds a `Schedule` aggregate directly, skipping the schedule service's validation.
pub struct ScheduleBuilder {
    schedule: Schedule,
}

impl ScheduleBuilder {
    pub fn new(doctor_id: Uuid, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            schedule: Schedule {
                id: Uuid::new_v4(),
                doctor_id,
                start_date,
                end_date,
                timezone: "UTC".to_string(),
                is_active: true,
                time_slots: Vec::new(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        }
    }

    pub fn slot(mut self, day: DayOfWeek, start: &str, end: &str, max_patients: u32) -> Self {
        let slot = TimeSlot {
            id: Uuid::new_v4(),
            schedule_id: self.schedule.id,
            day_of_week: day,
            start_time: parse_time(start),
            end_time: parse_time(end),
            examination_type: "GENERAL".to_string(),
            max_patients,
        };
        self.schedule.time_slots.push(slot);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.schedule.is_active = false;
        self
    }

    pub fn build(self) -> Schedule {
        self.schedule
    }
}

fn parse_time(value: &str) -> SlotTime {
    value
        .parse()
        .unwrap_or_else(|e| panic!("fixture time '{}' is invalid: {}", value, e))
}

pub async fn seed_schedule(store: &InMemoryStore, schedule: &Schedule) -> Result<(), StoreError> {
    let mut tx = store
        .begin(IsolationLevel::Serializable, StdDuration::from_secs(5))
        .await?;
    store.insert_schedule(&mut tx, schedule).await?;
    store.commit(tx).await
}

/// First date strictly after `after` that falls on `day`.
pub fn next_weekday(after: NaiveDate, day: DayOfWeek) -> NaiveDate {
    let mut cursor = after + Duration::days(1);
    while DayOfWeek::from_date(cursor) != day {
        cursor += Duration::days(1);
    }
    cursor
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture timestamp {}-{}-{} {}:{}", year, month, day, hour, minute))
}
