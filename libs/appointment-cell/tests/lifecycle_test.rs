// libs/appointment-cell/tests/lifecycle_test.rs
mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::{AppointmentLifecycleService, CancelAppointmentRequest};
use shared_database::{AppointmentRepository, InMemoryStore, IsolationLevel, StoreError, UnitOfWork};
use shared_models::{AppError, AppointmentStatus, CancelledBy, ConflictKind, DayOfWeek, PaymentStatus};

use common::{patient_cancellation, BookingFixture};

#[tokio::test]
async fn test_cancellation_frees_exactly_one_seat() {
    let fixture = BookingFixture::new().await;
    let monday = fixture.next(DayOfWeek::Monday);

    let mut booked = Vec::new();
    for _ in 0..15 {
        let confirmation = fixture
            .coordinator
            .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), monday))
            .await
            .unwrap();
        booked.push(confirmation);
    }

    let seventh = &booked[6];
    let cancelled = fixture
        .lifecycle
        .cancel_appointment(seventh.appointment.id, patient_cancellation("feeling better"))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

    let sixteenth = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), monday))
        .await;
    assert!(sixteenth.is_ok());

    let seventeenth = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), monday))
        .await;
    assert_matches!(seventeenth, Err(AppError::Conflict { kind: ConflictKind::SlotFull, .. }));
}

#[tokio::test]
async fn test_cancellation_records_metadata_and_cancels_pending_payment() {
    let fixture = BookingFixture::new().await;
    let confirmation = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), fixture.next(DayOfWeek::Monday)))
        .await
        .unwrap();

    fixture.clock.advance(Duration::hours(2));
    let admin = Uuid::new_v4();
    let cancelled = fixture
        .lifecycle
        .cancel_appointment(
            confirmation.appointment.id,
            CancelAppointmentRequest {
                cancelled_by: CancelledBy::Admin,
                cancelled_by_id: Some(admin),
                reason: "  doctor on leave  ".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Admin));
    assert_eq!(cancelled.cancelled_by_id, Some(admin));
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("doctor on leave"));
    assert_eq!(cancelled.cancelled_at, Some(confirmation.appointment.created_at + Duration::hours(2)));

    let payments = fixture.store.payments().await;
    assert_eq!(payments[0].status, PaymentStatus::Cancelled);
    assert_eq!(payments[0].code, confirmation.payment.code);
}

#[tokio::test]
async fn test_cancelled_patient_may_book_the_same_day_again() {
    let fixture = BookingFixture::new().await;
    let patient = Uuid::new_v4();
    let monday = fixture.next(DayOfWeek::Monday);

    let first = fixture
        .coordinator
        .book_appointment(fixture.request(patient, fixture.monday_slot(), monday))
        .await
        .unwrap();
    fixture
        .lifecycle
        .cancel_appointment(first.appointment.id, patient_cancellation("wrong slot"))
        .await
        .unwrap();

    let rebooked = fixture
        .coordinator
        .book_appointment(fixture.request(patient, fixture.monday_afternoon_slot(), monday))
        .await;
    tokio_test::assert_ok!(rebooked);
}

#[tokio::test]
async fn test_cancellation_guards() {
    let fixture = BookingFixture::new().await;
    let confirmation = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), fixture.next(DayOfWeek::Monday)))
        .await
        .unwrap();
    let id = confirmation.appointment.id;

    assert_matches!(
        fixture.lifecycle.cancel_appointment(id, patient_cancellation("   ")).await,
        Err(AppError::ValidationError(_))
    );
    assert_matches!(
        fixture.lifecycle.cancel_appointment(Uuid::new_v4(), patient_cancellation("gone")).await,
        Err(AppError::NotFound(_))
    );

    fixture.lifecycle.confirm_appointment(id).await.unwrap();
    fixture.lifecycle.start_appointment(id).await.unwrap();
    assert_matches!(
        fixture.lifecycle.cancel_appointment(id, patient_cancellation("too late")).await,
        Err(AppError::BusinessRuleViolation(msg)) if msg.contains("IN_PROGRESS")
    );
}

#[tokio::test]
async fn test_full_lifecycle_and_terminal_states() {
    let fixture = BookingFixture::new().await;
    let confirmation = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), fixture.next(DayOfWeek::Monday)))
        .await
        .unwrap();
    let id = confirmation.appointment.id;

    assert_matches!(fixture.lifecycle.start_appointment(id).await, Err(AppError::BusinessRuleViolation(_)));

    assert_eq!(fixture.lifecycle.confirm_appointment(id).await.unwrap().status, AppointmentStatus::Confirmed);
    assert_eq!(fixture.lifecycle.start_appointment(id).await.unwrap().status, AppointmentStatus::InProgress);
    assert_eq!(fixture.lifecycle.complete_appointment(id).await.unwrap().status, AppointmentStatus::Completed);

    assert_matches!(fixture.lifecycle.mark_no_show(id).await, Err(AppError::BusinessRuleViolation(_)));

    // A completed visit keeps its seat
    let slots = fixture
        .availability
        .get_available_slots(fixture.doctor.id, fixture.next(DayOfWeek::Monday))
        .await
        .unwrap();
    assert_eq!(slots[0].remaining, 14);
}

#[tokio::test]
async fn test_no_show_releases_capacity() {
    let fixture = BookingFixture::with_capacity(1).await;
    let monday = fixture.next(DayOfWeek::Monday);

    let confirmation = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), monday))
        .await
        .unwrap();
    fixture.lifecycle.mark_no_show(confirmation.appointment.id).await.unwrap();

    let replacement = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), monday))
        .await;
    tokio_test::assert_ok!(replacement);

    // The no-show payment is left for the billing side to settle
    let payments = fixture.store.payments().await;
    assert_eq!(payments[0].status, PaymentStatus::Pending);
}

// ==============================================================================
// RACING STATUS CHANGES
// ==============================================================================

fn shared_lifecycle(fixture: &BookingFixture) -> Arc<AppointmentLifecycleService<InMemoryStore>> {
    Arc::new(AppointmentLifecycleService::new(
        Arc::clone(&fixture.store),
        Arc::new(fixture.clock.clone()),
        &fixture.config,
    ))
}

#[tokio::test]
async fn test_stale_confirm_cannot_resurrect_a_cancelled_seat() {
    let fixture = BookingFixture::with_capacity(1).await;
    let monday = fixture.next(DayOfWeek::Monday);

    let first = fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), monday))
        .await
        .unwrap();

    // A confirm that read the appointment while it was still PENDING
    let mut stale = fixture
        .store
        .begin(IsolationLevel::ReadCommitted, StdDuration::from_secs(2))
        .await
        .unwrap();
    let mut confirmed = fixture
        .store
        .find_appointment(&mut stale, first.appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Pending);

    fixture
        .lifecycle
        .cancel_appointment(first.appointment.id, patient_cancellation("changed plans"))
        .await
        .unwrap();
    fixture
        .coordinator
        .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), monday))
        .await
        .unwrap();

    confirmed.status = AppointmentStatus::Confirmed;
    fixture.store.update_appointment(&mut stale, &confirmed).await.unwrap();
    assert_matches!(fixture.store.commit(stale).await, Err(StoreError::StaleRow(_)));

    let appointments = fixture.store.appointments().await;
    let occupying = appointments.iter().filter(|a| a.status.occupies_slot()).count();
    assert_eq!(occupying, 1);
    let original = appointments.iter().find(|a| a.id == first.appointment.id).unwrap();
    assert_eq!(original.status, AppointmentStatus::Cancelled);
    assert_eq!(fixture.store.payments().await[0].status, PaymentStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_confirm_always_ends_cancelled() {
    for _ in 0..20 {
        let fixture = BookingFixture::new().await;
        let lifecycle = shared_lifecycle(&fixture);
        let booked = fixture
            .coordinator
            .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), fixture.next(DayOfWeek::Monday)))
            .await
            .unwrap();
        let id = booked.appointment.id;

        let cancel = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.cancel_appointment(id, patient_cancellation("no longer needed")).await }
        });
        let confirm = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.confirm_appointment(id).await }
        });

        // Cancel is valid from either PENDING or CONFIRMED, so it always lands
        assert!(cancel.await.unwrap().is_ok());
        match confirm.await.unwrap() {
            Ok(_) => {}
            Err(e) => assert_matches!(e, AppError::BusinessRuleViolation(msg) if msg.contains("CANCELLED")),
        }

        let stored = fixture.store.appointments().await;
        assert_eq!(stored[0].status, AppointmentStatus::Cancelled);
        assert_eq!(fixture.store.payments().await[0].status, PaymentStatus::Cancelled);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_cancel_has_one_winner() {
    for _ in 0..20 {
        let fixture = BookingFixture::new().await;
        let lifecycle = shared_lifecycle(&fixture);
        let booked = fixture
            .coordinator
            .book_appointment(fixture.request(Uuid::new_v4(), fixture.monday_slot(), fixture.next(DayOfWeek::Monday)))
            .await
            .unwrap();
        let id = booked.appointment.id;

        let by_patient = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.cancel_appointment(id, patient_cancellation("patient reason")).await }
        });
        let by_admin = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                lifecycle
                    .cancel_appointment(
                        id,
                        CancelAppointmentRequest {
                            cancelled_by: CancelledBy::Admin,
                            cancelled_by_id: None,
                            reason: "admin reason".to_string(),
                        },
                    )
                    .await
            }
        });

        let outcomes = [by_patient.await.unwrap(), by_admin.await.unwrap()];
        let winners: Vec<_> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(AppError::BusinessRuleViolation(msg)) if msg.contains("can no longer be cancelled"))));

        // The stored cancellation is the winner's, never a mix of both
        let stored = &fixture.store.appointments().await[0];
        assert_eq!(stored.cancelled_by, winners[0].cancelled_by);
        assert_eq!(stored.cancellation_reason, winners[0].cancellation_reason);
    }
}
