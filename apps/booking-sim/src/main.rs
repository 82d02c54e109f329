use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use dotenv::dotenv;
use futures::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use appointment_cell::{
    AppointmentLifecycleService, AvailabilityResolver, BookAppointmentRequest, BookingCoordinator,
    CancelAppointmentRequest, SideEffectDispatcher,
};
use doctor_cell::SupabaseDoctorDirectory;
use schedule_cell::{CreateScheduleRequest, ScheduleService, TimeSlotInput};
use shared_config::AppConfig;
use shared_database::{DoctorLookup, InMemoryStore};
use shared_models::{AppError, CancelledBy, ConflictKind, DayOfWeek, DoctorProfile, DoctorStatus, PaymentMethod};
use shared_utils::{Clock, SystemClock};

/// Seeds one doctor and one schedule, then fires concurrent bookers at a single slot.
#[tokio::main]
async fn main() -> Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting booking simulation");

    let config = AppConfig::from_env();
    let capacity: u32 = env_or("SIM_CAPACITY", 15);
    let bookers: usize = env_or("SIM_BOOKERS", 25);

    let store = Arc::new(InMemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // **Step 1: Doctor directory**
    let (doctor_id, doctors) = doctor_directory(&config, &store)?;

    // **Step 2: Publish a schedule on next week's weekday**
    let target_date = clock.today() + Duration::days(7);
    let weekday = DayOfWeek::from_date(target_date);
    let schedules = ScheduleService::new(Arc::clone(&store), Arc::clone(&clock), &config.scheduling);
    let schedule = schedules
        .create_schedule(CreateScheduleRequest {
            doctor_id,
            start_date: clock.today(),
            end_date: clock.today() + Duration::days(27),
            timezone: Some("UTC".to_string()),
            is_active: Some(true),
            days_of_week: None,
            time_slots: vec![TimeSlotInput {
                day_of_week: weekday,
                start_time: "08:00".to_string(),
                end_time: "11:30".to_string(),
                examination_type: "GENERAL".to_string(),
                max_patients: capacity,
            }],
        })
        .await?;
    let slot_id = schedule
        .time_slots
        .first()
        .map(|slot| slot.id)
        .context("schedule was created without time slots")?;

    let availability = AvailabilityResolver::new(Arc::clone(&store), &config.scheduling);
    let before = availability.get_available_slots(doctor_id, target_date).await?;
    info!("Before booking: {} open slots on {} ({})", before.len(), target_date, weekday);

    // **Step 3: Concurrent bookers**
    let coordinator = Arc::new(
        BookingCoordinator::new(Arc::clone(&store), doctors, Arc::clone(&clock), &config.scheduling)
            .with_side_effects(SideEffectDispatcher::from_config(&config)),
    );

    let handles: Vec<_> = (0..bookers)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let request = BookAppointmentRequest {
                patient_id: Uuid::new_v4(),
                doctor_id,
                time_slot_id: slot_id,
                appointment_date: target_date,
                examination_type: None,
                symptoms: None,
                payment_method: PaymentMethod::BankTransfer,
            };
            tokio::spawn(async move { coordinator.book_appointment(request).await })
        })
        .collect();

    let mut confirmed = Vec::new();
    let mut full = 0;
    for joined in join_all(handles).await {
        match joined.context("booking task panicked")? {
            Ok(confirmation) => confirmed.push(confirmation),
            Err(AppError::Conflict { kind: ConflictKind::SlotFull, .. }) => full += 1,
            Err(e) => warn!("Booking failed: {}", e),
        }
    }
    info!("{} bookers: {} booked, {} turned away with slot full", bookers, confirmed.len(), full);

    // **Step 4: Cancel one and let a late booker take the seat**
    if let Some(first) = confirmed.first() {
        let lifecycle = AppointmentLifecycleService::new(Arc::clone(&store), Arc::clone(&clock), &config.scheduling);
        lifecycle
            .cancel_appointment(
                first.appointment.id,
                CancelAppointmentRequest {
                    cancelled_by: CancelledBy::Patient,
                    cancelled_by_id: Some(first.appointment.patient_id),
                    reason: "simulated cancellation".to_string(),
                },
            )
            .await?;

        let late = coordinator
            .book_appointment(BookAppointmentRequest {
                patient_id: Uuid::new_v4(),
                doctor_id,
                time_slot_id: slot_id,
                appointment_date: target_date,
                examination_type: None,
                symptoms: Some("late booker".to_string()),
                payment_method: PaymentMethod::Cash,
            })
            .await;
        match late {
            Ok(confirmation) => info!("Late booker took the freed seat with code {}", confirmation.payment.code),
            Err(e) => warn!("Late booker failed: {}", e),
        }
    }

    let after = availability.get_available_slots(doctor_id, target_date).await?;
    let remaining = after.first().map(|slot| slot.remaining).unwrap_or(0);
    info!("After booking: {} seats remaining on {}", remaining, target_date);

    for payment in store.payments().await {
        info!("Payment {} {:?} amount {}", payment.code, payment.status, payment.amount);
    }

    Ok(())
}

/// Uses the Supabase directory when configured with `SIM_DOCTOR_ID`, otherwise
/// seeds an active doctor into the in-memory store.
fn doctor_directory(config: &AppConfig, store: &Arc<InMemoryStore>) -> Result<(Uuid, Arc<dyn DoctorLookup>)> {
    if let Ok(raw) = env::var("SIM_DOCTOR_ID") {
        if config.is_configured() {
            let doctor_id = Uuid::parse_str(raw.trim()).context("SIM_DOCTOR_ID is not a UUID")?;
            info!("Using Supabase doctor directory for doctor {}", doctor_id);
            return Ok((doctor_id, Arc::new(SupabaseDoctorDirectory::new(config))));
        }
        warn!("SIM_DOCTOR_ID set but Supabase is not configured, seeding a local doctor");
    }

    let doctor = DoctorProfile {
        id: Uuid::new_v4(),
        status: DoctorStatus::Active,
        consultation_fee: 150_000,
        deleted_at: None,
    };
    store.upsert_doctor(doctor.clone())?;
    info!("Seeded local doctor {}", doctor.id);

    let directory: Arc<dyn DoctorLookup> = store.clone();
    Ok((doctor.id, directory))
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
