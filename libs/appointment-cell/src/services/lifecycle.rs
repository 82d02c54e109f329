// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulingConfig;
use shared_database::{AppointmentRepository, IsolationLevel, PaymentRepository};
use shared_models::{AppError, Appointment, AppointmentStatus, ConflictKind, PaymentStatus};
use shared_utils::Clock;

use crate::models::CancelAppointmentRequest;

/// Statuses reachable from `current`. Terminal statuses have none.
pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
    match current {
        AppointmentStatus::Pending => &[
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ],
        AppointmentStatus::Confirmed => &[
            AppointmentStatus::InProgress,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ],
        AppointmentStatus::InProgress => &[AppointmentStatus::Completed],
        AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow => &[],
    }
}

pub fn validate_status_transition(current: AppointmentStatus, next: AppointmentStatus) -> Result<(), AppError> {
    if valid_transitions(current).contains(&next) {
        return Ok(());
    }
    warn!("Invalid status transition attempted: {} -> {}", current, next);
    Err(AppError::BusinessRuleViolation(format!(
        "Appointment cannot move from {} to {}",
        current, next
    )))
}

#[derive(Clone, Copy)]
enum Change<'a> {
    Cancel { request: &'a CancelAppointmentRequest, reason: &'a str },
    Status(AppointmentStatus),
}

/// Post-booking status changes. Each call is one short read-committed unit of work;
/// when another commit changes the same rows first, the change is re-read and
/// re-validated from scratch.
pub struct AppointmentLifecycleService<S>
where
    S: AppointmentRepository + PaymentRepository,
{
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    tx_timeout: Duration,
    max_attempts: u32,
}

impl<S> AppointmentLifecycleService<S>
where
    S: AppointmentRepository + PaymentRepository,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &SchedulingConfig) -> Self {
        Self {
            store,
            clock,
            tx_timeout: config.transaction_timeout(),
            max_attempts: config.max_commit_attempts.max(1),
        }
    }

    /// Cancels a PENDING or CONFIRMED appointment. Its seat is free again as soon
    /// as this commits, and a still-pending payment is cancelled with it.
    #[instrument(skip(self, request), fields(actor = ?request.cancelled_by))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppError> {
        info!("Cancelling appointment {}", appointment_id);

        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(AppError::ValidationError("Cancellation reason is required".to_string()));
        }

        let cancelled = self
            .apply(appointment_id, Change::Cancel { request: &request, reason })
            .await?;

        info!("Appointment {} cancelled by {:?}", appointment_id, request.cancelled_by);
        Ok(cancelled)
    }

    pub async fn confirm_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppError> {
        self.transition(appointment_id, AppointmentStatus::Confirmed).await
    }

    pub async fn start_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppError> {
        self.transition(appointment_id, AppointmentStatus::InProgress).await
    }

    pub async fn complete_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppError> {
        self.transition(appointment_id, AppointmentStatus::Completed).await
    }

    pub async fn mark_no_show(&self, appointment_id: Uuid) -> Result<Appointment, AppError> {
        self.transition(appointment_id, AppointmentStatus::NoShow).await
    }

    async fn transition(&self, appointment_id: Uuid, next: AppointmentStatus) -> Result<Appointment, AppError> {
        debug!("Moving appointment {} to {}", appointment_id, next);

        let appointment = self.apply(appointment_id, Change::Status(next)).await?;
        info!("Appointment {} is now {}", appointment_id, next);
        Ok(appointment)
    }

    async fn apply(&self, appointment_id: Uuid, change: Change<'_>) -> Result<Appointment, AppError> {
        let mut attempt = 1;
        loop {
            match self.apply_once(appointment_id, change).await {
                Err(e) if e.conflict_kind() == Some(ConflictKind::ConcurrentUpdate) && attempt < self.max_attempts => {
                    warn!("Appointment {} changed underneath attempt {}, re-reading", appointment_id, attempt);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn apply_once(&self, appointment_id: Uuid, change: Change<'_>) -> Result<Appointment, AppError> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted, self.tx_timeout).await?;
        let result = match change {
            Change::Cancel { request, reason } => self.cancel_in_tx(&mut tx, appointment_id, request, reason).await,
            Change::Status(next) => self.transition_in_tx(&mut tx, appointment_id, next).await,
        };
        match result {
            Ok(appointment) => {
                self.store.commit(tx).await?;
                Ok(appointment)
            }
            Err(e) => {
                self.store.rollback(tx).await;
                Err(e)
            }
        }
    }

    async fn transition_in_tx(
        &self,
        tx: &mut S::Tx,
        appointment_id: Uuid,
        next: AppointmentStatus,
    ) -> Result<Appointment, AppError> {
        let mut appointment = self.load(tx, appointment_id).await?;
        validate_status_transition(appointment.status, next)?;

        appointment.status = next;
        appointment.updated_at = self.clock.now();
        self.store.update_appointment(tx, &appointment).await?;
        Ok(appointment)
    }

    async fn cancel_in_tx(
        &self,
        tx: &mut S::Tx,
        appointment_id: Uuid,
        request: &CancelAppointmentRequest,
        reason: &str,
    ) -> Result<Appointment, AppError> {
        let mut appointment = self.load(tx, appointment_id).await?;

        if !appointment.status.is_cancellable() {
            return Err(AppError::BusinessRuleViolation(format!(
                "Appointment {} is {} and can no longer be cancelled",
                appointment_id, appointment.status
            )));
        }

        let now = self.clock.now();
        appointment.status = AppointmentStatus::Cancelled;
        appointment.cancelled_by = Some(request.cancelled_by);
        appointment.cancelled_by_id = request.cancelled_by_id;
        appointment.cancellation_reason = Some(reason.to_string());
        appointment.cancelled_at = Some(now);
        appointment.updated_at = now;
        self.store.update_appointment(tx, &appointment).await?;

        if let Some(mut payment) = self.store.find_payment_by_appointment(tx, appointment_id).await? {
            if payment.status == PaymentStatus::Pending {
                payment.status = PaymentStatus::Cancelled;
                payment.updated_at = now;
                self.store.update_payment(tx, &payment).await?;
                debug!("Payment {} cancelled with its appointment", payment.code);
            }
        }

        Ok(appointment)
    }

    async fn load(&self, tx: &mut S::Tx, appointment_id: Uuid) -> Result<Appointment, AppError> {
        self.store
            .find_appointment(tx, appointment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Appointment {} not found", appointment_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn terminal_statuses_have_no_exits() {
        for status in [AppointmentStatus::Completed, AppointmentStatus::Cancelled, AppointmentStatus::NoShow] {
            assert!(valid_transitions(status).is_empty());
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn in_progress_can_only_complete() {
        assert!(validate_status_transition(AppointmentStatus::InProgress, AppointmentStatus::Completed).is_ok());
        assert_matches!(
            validate_status_transition(AppointmentStatus::InProgress, AppointmentStatus::Cancelled),
            Err(AppError::BusinessRuleViolation(_))
        );
    }

    #[test]
    fn pending_cannot_skip_to_in_progress() {
        assert!(validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::InProgress).is_err());
        assert!(validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::Confirmed).is_ok());
        assert!(validate_status_transition(AppointmentStatus::Confirmed, AppointmentStatus::NoShow).is_ok());
    }
}
