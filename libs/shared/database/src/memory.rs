// libs/shared/database/src/memory.rs
//
// Transactional in-memory store. Serializable units of work hold the store
// lock from `begin` to `commit`, so every read they make stays valid until
// their writes land. Read-committed units of work read a snapshot and replay
// their row writes under the lock at commit time, refusing any write whose
// row changed after the snapshot was taken.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{Appointment, DoctorProfile, PaymentRecord, Schedule};

use crate::repository::{
    AppointmentRepository, DoctorLookup, IsolationLevel, PaymentRepository, ScheduleStore,
    StoreError, UnitOfWork, PAYMENT_APPOINTMENT_UNIQUE, PAYMENT_CODE_UNIQUE,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    schedules: HashMap<Uuid, Schedule>,
    appointments: HashMap<Uuid, Appointment>,
    payments: HashMap<Uuid, PaymentRecord>,
}

#[derive(Debug, Clone)]
enum WriteOp {
    InsertSchedule(Schedule),
    UpdateSchedule(Schedule),
    DeleteSchedule(Uuid, DateTime<Utc>),
    InsertAppointment(Appointment),
    UpdateAppointment(Appointment),
    InsertPayment(PaymentRecord),
    UpdatePayment(PaymentRecord),
}

/// A row as a read-committed unit of work saw it before overwriting it.
#[derive(Debug, Clone)]
enum RowImage {
    Schedule(Schedule),
    Appointment(Appointment),
    Payment(PaymentRecord),
}

#[derive(Debug, Clone)]
struct PendingWrite {
    op: WriteOp,
    read: Option<RowImage>,
}

impl StoreState {
    fn image_of(&self, op: &WriteOp) -> Option<RowImage> {
        match op {
            WriteOp::UpdateSchedule(Schedule { id, .. }) | WriteOp::DeleteSchedule(id, _) => {
                self.schedules.get(id).cloned().map(RowImage::Schedule)
            }
            WriteOp::UpdateAppointment(appointment) => {
                self.appointments.get(&appointment.id).cloned().map(RowImage::Appointment)
            }
            WriteOp::UpdatePayment(payment) => self.payments.get(&payment.id).cloned().map(RowImage::Payment),
            WriteOp::InsertSchedule(_) | WriteOp::InsertAppointment(_) | WriteOp::InsertPayment(_) => None,
        }
    }

    fn ensure_unchanged(&self, read: &RowImage) -> Result<(), StoreError> {
        let unchanged = match read {
            RowImage::Schedule(row) => self.schedules.get(&row.id) == Some(row),
            RowImage::Appointment(row) => self.appointments.get(&row.id) == Some(row),
            RowImage::Payment(row) => self.payments.get(&row.id) == Some(row),
        };
        if unchanged {
            return Ok(());
        }
        let row = match read {
            RowImage::Schedule(row) => format!("schedule {}", row.id),
            RowImage::Appointment(row) => format!("appointment {}", row.id),
            RowImage::Payment(row) => format!("payment {}", row.id),
        };
        Err(StoreError::StaleRow(row))
    }

    fn live_schedules(&self) -> impl Iterator<Item = &Schedule> {
        self.schedules.values().filter(|schedule| !schedule.is_deleted())
    }

    fn apply(&mut self, op: WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::InsertSchedule(schedule) => {
                if self.schedules.contains_key(&schedule.id) {
                    return Err(StoreError::UniqueViolation { constraint: "schedules_pkey".to_string() });
                }
                self.schedules.insert(schedule.id, schedule);
            }
            WriteOp::UpdateSchedule(schedule) => {
                match self.schedules.get(&schedule.id) {
                    Some(existing) if !existing.is_deleted() => {}
                    _ => return Err(StoreError::NotFound(format!("schedule {}", schedule.id))),
                }
                self.schedules.insert(schedule.id, schedule);
            }
            WriteOp::DeleteSchedule(schedule_id, deleted_at) => {
                let schedule = self
                    .schedules
                    .get_mut(&schedule_id)
                    .filter(|schedule| !schedule.is_deleted())
                    .ok_or_else(|| StoreError::NotFound(format!("schedule {}", schedule_id)))?;
                schedule.deleted_at = Some(deleted_at);
                schedule.is_active = false;
                schedule.updated_at = deleted_at;
            }
            WriteOp::InsertAppointment(appointment) => {
                if self.appointments.contains_key(&appointment.id) {
                    return Err(StoreError::UniqueViolation { constraint: "appointments_pkey".to_string() });
                }
                self.appointments.insert(appointment.id, appointment);
            }
            WriteOp::UpdateAppointment(appointment) => {
                let existing = self
                    .appointments
                    .get(&appointment.id)
                    .ok_or_else(|| StoreError::NotFound(format!("appointment {}", appointment.id)))?;
                if existing.patient_id != appointment.patient_id
                    || existing.doctor_id != appointment.doctor_id
                    || existing.time_slot_id != appointment.time_slot_id
                    || existing.appointment_date != appointment.appointment_date
                {
                    return Err(StoreError::ConstraintViolation(format!(
                        "appointment {} patient/doctor/slot/date are immutable",
                        appointment.id
                    )));
                }
                self.appointments.insert(appointment.id, appointment);
            }
            WriteOp::InsertPayment(payment) => {
                if self.payments.contains_key(&payment.id) {
                    return Err(StoreError::UniqueViolation { constraint: "payments_pkey".to_string() });
                }
                if !self.appointments.contains_key(&payment.appointment_id) {
                    return Err(StoreError::ConstraintViolation(format!(
                        "payment references missing appointment {}",
                        payment.appointment_id
                    )));
                }
                for existing in self.payments.values() {
                    if existing.code == payment.code {
                        return Err(StoreError::UniqueViolation { constraint: PAYMENT_CODE_UNIQUE.to_string() });
                    }
                    if existing.appointment_id == payment.appointment_id {
                        return Err(StoreError::UniqueViolation {
                            constraint: PAYMENT_APPOINTMENT_UNIQUE.to_string(),
                        });
                    }
                }
                self.payments.insert(payment.id, payment);
            }
            WriteOp::UpdatePayment(payment) => {
                let existing = self
                    .payments
                    .get(&payment.id)
                    .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment.id)))?;
                if existing.code != payment.code || existing.appointment_id != payment.appointment_id {
                    return Err(StoreError::ConstraintViolation(format!(
                        "payment {} code and appointment are immutable",
                        payment.id
                    )));
                }
                self.payments.insert(payment.id, payment);
            }
        }
        Ok(())
    }
}

/// Transaction handle for [`InMemoryStore`]. Dropping it without committing rolls back.
#[derive(Debug)]
pub struct MemoryTx {
    isolation: IsolationLevel,
    deadline: Instant,
    guard: Option<OwnedMutexGuard<StoreState>>,
    working: StoreState,
    pending: Vec<PendingWrite>,
}

impl MemoryTx {
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if Instant::now() >= self.deadline {
            return Err(StoreError::Timeout);
        }
        Ok(())
    }

    fn read(&self) -> Result<&StoreState, StoreError> {
        self.ensure_open()?;
        Ok(&self.working)
    }

    fn write(&mut self, op: WriteOp) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.isolation == IsolationLevel::Serializable {
            return self.working.apply(op);
        }
        let read = self.working.image_of(&op);
        self.working.apply(op.clone())?;
        self.pending.push(PendingWrite { op, read });
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    doctors: Arc<RwLock<HashMap<Uuid, DoctorProfile>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_doctor(&self, doctor: DoctorProfile) -> Result<(), StoreError> {
        let mut doctors = self
            .doctors
            .write()
            .map_err(|_| StoreError::Backend("doctor directory lock poisoned".to_string()))?;
        doctors.insert(doctor.id, doctor);
        Ok(())
    }

    /// Committed appointments, oldest first.
    pub async fn appointments(&self) -> Vec<Appointment> {
        let state = self.state.lock().await;
        let mut appointments: Vec<_> = state.appointments.values().cloned().collect();
        appointments.sort_by_key(|appointment| appointment.created_at);
        appointments
    }

    /// Committed payment records, ordered by code.
    pub async fn payments(&self) -> Vec<PaymentRecord> {
        let state = self.state.lock().await;
        let mut payments: Vec<_> = state.payments.values().cloned().collect();
        payments.sort_by(|a, b| a.code.cmp(&b.code));
        payments
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self, isolation: IsolationLevel, timeout: Duration) -> Result<MemoryTx, StoreError> {
        let deadline = Instant::now() + timeout;

        match isolation {
            IsolationLevel::Serializable => {
                let guard = tokio::time::timeout(timeout, Arc::clone(&self.state).lock_owned())
                    .await
                    .map_err(|_| {
                        warn!("Timed out waiting {:?} for a serializable transaction", timeout);
                        StoreError::Timeout
                    })?;
                let working = (*guard).clone();
                Ok(MemoryTx { isolation, deadline, guard: Some(guard), working, pending: Vec::new() })
            }
            IsolationLevel::ReadCommitted => {
                let snapshot = tokio::time::timeout(timeout, self.state.lock())
                    .await
                    .map_err(|_| StoreError::Timeout)?
                    .clone();
                Ok(MemoryTx { isolation, deadline, guard: None, working: snapshot, pending: Vec::new() })
            }
        }
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        tx.ensure_open()?;

        let MemoryTx { isolation, deadline, guard, working, pending } = tx;
        match (isolation, guard) {
            (IsolationLevel::Serializable, Some(mut guard)) => {
                *guard = working;
            }
            (IsolationLevel::Serializable, None) => {
                return Err(StoreError::Backend("serializable transaction lost its lock".to_string()));
            }
            (IsolationLevel::ReadCommitted, _) => {
                if pending.is_empty() {
                    return Ok(());
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                let mut live = tokio::time::timeout(remaining, self.state.lock())
                    .await
                    .map_err(|_| StoreError::Timeout)?;
                let mut staged = live.clone();
                for PendingWrite { op, read } in pending {
                    if let Some(read) = &read {
                        staged.ensure_unchanged(read).map_err(|e| {
                            warn!("Read-committed transaction rejected at commit: {}", e);
                            e
                        })?;
                    }
                    staged.apply(op)?;
                }
                *live = staged;
            }
        }

        debug!("Committed {:?} transaction", isolation);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) {
        debug!("Rolled back {:?} transaction with {} pending writes", tx.isolation, tx.pending.len());
        drop(tx);
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn insert_schedule(&self, tx: &mut MemoryTx, schedule: &Schedule) -> Result<(), StoreError> {
        tx.write(WriteOp::InsertSchedule(schedule.clone()))
    }

    async fn update_schedule(&self, tx: &mut MemoryTx, schedule: &Schedule) -> Result<(), StoreError> {
        tx.write(WriteOp::UpdateSchedule(schedule.clone()))
    }

    async fn delete_schedule(
        &self,
        tx: &mut MemoryTx,
        schedule_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tx.write(WriteOp::DeleteSchedule(schedule_id, deleted_at))
    }

    async fn find_schedule(&self, tx: &mut MemoryTx, schedule_id: Uuid) -> Result<Option<Schedule>, StoreError> {
        Ok(tx.read()?.live_schedules().find(|schedule| schedule.id == schedule_id).cloned())
    }

    async fn find_schedule_by_slot(
        &self,
        tx: &mut MemoryTx,
        time_slot_id: Uuid,
    ) -> Result<Option<Schedule>, StoreError> {
        Ok(tx
            .read()?
            .live_schedules()
            .find(|schedule| schedule.slot(time_slot_id).is_some())
            .cloned())
    }

    async fn find_active_by_doctor_covering_date(
        &self,
        tx: &mut MemoryTx,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Schedule>, StoreError> {
        let mut schedules: Vec<_> = tx
            .read()?
            .live_schedules()
            .filter(|schedule| schedule.doctor_id == doctor_id && schedule.is_active && schedule.covers(date))
            .cloned()
            .collect();
        schedules.sort_by_key(|schedule| (schedule.start_date, schedule.created_at));
        Ok(schedules)
    }

    async fn find_active_overlapping(
        &self,
        tx: &mut MemoryTx,
        doctor_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Schedule>, StoreError> {
        let mut schedules: Vec<_> = tx
            .read()?
            .live_schedules()
            .filter(|schedule| {
                schedule.doctor_id == doctor_id && schedule.is_active && schedule.overlaps_range(start, end)
            })
            .cloned()
            .collect();
        schedules.sort_by_key(|schedule| (schedule.start_date, schedule.created_at));
        Ok(schedules)
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryStore {
    async fn count_non_terminal(
        &self,
        tx: &mut MemoryTx,
        time_slot_id: Uuid,
        date: NaiveDate,
    ) -> Result<u32, StoreError> {
        let count = tx
            .read()?
            .appointments
            .values()
            .filter(|a| a.time_slot_id == time_slot_id && a.appointment_date == date && a.occupies_slot())
            .count();
        Ok(count as u32)
    }

    async fn find_non_terminal(
        &self,
        tx: &mut MemoryTx,
        patient_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Appointment>, StoreError> {
        Ok(tx
            .read()?
            .appointments
            .values()
            .find(|a| {
                a.patient_id == patient_id && a.doctor_id == doctor_id && a.appointment_date == date && a.occupies_slot()
            })
            .cloned())
    }

    async fn count_non_terminal_for_schedule_from(
        &self,
        tx: &mut MemoryTx,
        schedule_id: Uuid,
        from: NaiveDate,
    ) -> Result<u32, StoreError> {
        let count = tx
            .read()?
            .appointments
            .values()
            .filter(|a| a.schedule_id == schedule_id && a.appointment_date >= from && a.occupies_slot())
            .count();
        Ok(count as u32)
    }

    async fn insert_appointment(&self, tx: &mut MemoryTx, appointment: &Appointment) -> Result<(), StoreError> {
        tx.write(WriteOp::InsertAppointment(appointment.clone()))
    }

    async fn find_appointment(
        &self,
        tx: &mut MemoryTx,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        Ok(tx.read()?.appointments.get(&appointment_id).cloned())
    }

    async fn update_appointment(&self, tx: &mut MemoryTx, appointment: &Appointment) -> Result<(), StoreError> {
        tx.write(WriteOp::UpdateAppointment(appointment.clone()))
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn max_code_with_prefix(&self, tx: &mut MemoryTx, prefix: &str) -> Result<Option<String>, StoreError> {
        Ok(tx
            .read()?
            .payments
            .values()
            .filter_map(|payment| {
                let suffix = payment.code.strip_prefix(prefix)?;
                if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                suffix.parse::<u64>().ok().map(|sequence| (sequence, &payment.code))
            })
            .max_by_key(|(sequence, _)| *sequence)
            .map(|(_, code)| code.clone()))
    }

    async fn insert_payment(&self, tx: &mut MemoryTx, payment: &PaymentRecord) -> Result<(), StoreError> {
        tx.write(WriteOp::InsertPayment(payment.clone()))
    }

    async fn find_payment_by_appointment(
        &self,
        tx: &mut MemoryTx,
        appointment_id: Uuid,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(tx
            .read()?
            .payments
            .values()
            .find(|payment| payment.appointment_id == appointment_id)
            .cloned())
    }

    async fn update_payment(&self, tx: &mut MemoryTx, payment: &PaymentRecord) -> Result<(), StoreError> {
        tx.write(WriteOp::UpdatePayment(payment.clone()))
    }
}

#[async_trait]
impl DoctorLookup for InMemoryStore {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<DoctorProfile>, StoreError> {
        let doctors = self
            .doctors
            .read()
            .map_err(|_| StoreError::Backend("doctor directory lock poisoned".to_string()))?;
        Ok(doctors.get(&doctor_id).cloned())
    }
}
