// libs/shared/database/src/repository.rs
//
// Persistence boundary for the scheduling engine. Every call that reads or
// writes schedules, appointments or payments runs inside a caller-supplied
// transaction handle obtained from `UnitOfWork::begin`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use shared_models::{
    AppError, Appointment, ConflictKind, DoctorProfile, PaymentRecord, Schedule,
};

/// Constraint name reported when two payment records share a code.
pub const PAYMENT_CODE_UNIQUE: &str = "payments_code_key";
/// Constraint name reported when an appointment already has a payment record.
pub const PAYMENT_APPOINTMENT_UNIQUE: &str = "payments_appointment_id_key";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("transaction exceeded its deadline")]
    Timeout,

    #[error("unique constraint '{constraint}' violated")]
    UniqueViolation { constraint: String },

    #[error("constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("row not found: {0}")]
    NotFound(String),

    /// A read-committed write found its row changed by another commit.
    #[error("{0} changed since it was read")]
    StaleRow(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => {
                AppError::Timeout("transaction exceeded its deadline and was rolled back".to_string())
            }
            StoreError::UniqueViolation { constraint } if constraint == PAYMENT_CODE_UNIQUE => {
                AppError::conflict(ConflictKind::CodeCollision, "payment code already issued")
            }
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::StaleRow(row) => {
                AppError::conflict(ConflictKind::ConcurrentUpdate, format!("{} changed since it was read", row))
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Snapshot reads; writes are applied row by row at commit.
    ReadCommitted,
    /// The whole unit of work observes and writes one consistent state.
    Serializable,
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Tx: Send;

    /// Opens a unit of work that must commit before `timeout` elapses.
    async fn begin(&self, isolation: IsolationLevel, timeout: Duration) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx);
}

/// Schedule + TimeSlot aggregates. Tombstoned schedules are invisible to every finder.
#[async_trait]
pub trait ScheduleStore: UnitOfWork {
    async fn insert_schedule(&self, tx: &mut Self::Tx, schedule: &Schedule) -> Result<(), StoreError>;

    /// Replaces the stored aggregate, time slots included.
    async fn update_schedule(&self, tx: &mut Self::Tx, schedule: &Schedule) -> Result<(), StoreError>;

    async fn delete_schedule(
        &self,
        tx: &mut Self::Tx,
        schedule_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn find_schedule(&self, tx: &mut Self::Tx, schedule_id: Uuid) -> Result<Option<Schedule>, StoreError>;

    async fn find_schedule_by_slot(
        &self,
        tx: &mut Self::Tx,
        time_slot_id: Uuid,
    ) -> Result<Option<Schedule>, StoreError>;

    async fn find_active_by_doctor_covering_date(
        &self,
        tx: &mut Self::Tx,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Schedule>, StoreError>;

    /// Active schedules of `doctor_id` whose date range intersects `[start, end]`.
    async fn find_active_overlapping(
        &self,
        tx: &mut Self::Tx,
        doctor_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Schedule>, StoreError>;
}

#[async_trait]
pub trait AppointmentRepository: UnitOfWork {
    /// Appointments on `(time_slot_id, date)` that still hold capacity.
    async fn count_non_terminal(
        &self,
        tx: &mut Self::Tx,
        time_slot_id: Uuid,
        date: NaiveDate,
    ) -> Result<u32, StoreError>;

    async fn find_non_terminal(
        &self,
        tx: &mut Self::Tx,
        patient_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Appointment>, StoreError>;

    async fn count_non_terminal_for_schedule_from(
        &self,
        tx: &mut Self::Tx,
        schedule_id: Uuid,
        from: NaiveDate,
    ) -> Result<u32, StoreError>;

    async fn insert_appointment(&self, tx: &mut Self::Tx, appointment: &Appointment) -> Result<(), StoreError>;

    async fn find_appointment(
        &self,
        tx: &mut Self::Tx,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Persists status and cancellation metadata. The doctor/slot/date triple is immutable.
    async fn update_appointment(&self, tx: &mut Self::Tx, appointment: &Appointment) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PaymentRepository: UnitOfWork {
    /// Highest code starting with `prefix`, compared by its numeric sequence suffix.
    async fn max_code_with_prefix(&self, tx: &mut Self::Tx, prefix: &str) -> Result<Option<String>, StoreError>;

    async fn insert_payment(&self, tx: &mut Self::Tx, payment: &PaymentRecord) -> Result<(), StoreError>;

    async fn find_payment_by_appointment(
        &self,
        tx: &mut Self::Tx,
        appointment_id: Uuid,
    ) -> Result<Option<PaymentRecord>, StoreError>;

    async fn update_payment(&self, tx: &mut Self::Tx, payment: &PaymentRecord) -> Result<(), StoreError>;
}

/// Read-only view of the doctor directory. Soft-deleted doctors are still returned,
/// flagged through `DoctorProfile::deleted_at`.
#[async_trait]
pub trait DoctorLookup: Send + Sync {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<DoctorProfile>, StoreError>;
}

/// Everything the booking engine persists, behind one transactional store.
pub trait SchedulingStore: ScheduleStore + AppointmentRepository + PaymentRepository {}

impl<T> SchedulingStore for T where T: ScheduleStore + AppointmentRepository + PaymentRepository {}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn payment_code_violation_becomes_retryable_conflict() {
        let err: AppError = StoreError::UniqueViolation {
            constraint: PAYMENT_CODE_UNIQUE.to_string(),
        }
        .into();

        assert_matches!(err, AppError::Conflict { kind: ConflictKind::CodeCollision, .. });
        assert!(err.is_retryable());
    }

    #[test]
    fn other_store_errors_map_to_taxonomy() {
        assert_matches!(AppError::from(StoreError::Timeout), AppError::Timeout(_));
        assert_matches!(
            AppError::from(StoreError::StaleRow("appointment 1".into())),
            AppError::Conflict { kind: ConflictKind::ConcurrentUpdate, .. }
        );
        assert_matches!(
            AppError::from(StoreError::UniqueViolation { constraint: PAYMENT_APPOINTMENT_UNIQUE.into() }),
            AppError::Database(_)
        );
        assert_matches!(AppError::from(StoreError::NotFound("schedule".into())), AppError::NotFound(_));
    }
}
