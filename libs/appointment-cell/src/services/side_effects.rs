// libs/appointment-cell/src/services/side_effects.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::BookingConfirmation;

const SIDE_EFFECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Work triggered by a committed booking. Runs after commit and can never undo it.
#[async_trait]
pub trait BookingSideEffect: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_booked(&self, booking: &BookingConfirmation) -> Result<()>;
}

// ==============================================================================
// WEBHOOK NOTIFIER
// ==============================================================================

/// POSTs the booking as JSON to a notification endpoint.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl BookingSideEffect for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn on_booked(&self, booking: &BookingConfirmation) -> Result<()> {
        let body = json!({
            "event": "appointment.booked",
            "appointment": booking.appointment,
            "payment": booking.payment,
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(SIDE_EFFECT_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Webhook returned {}: {}", status, error_text));
        }

        debug!("Webhook notified for appointment {}", booking.appointment.id);
        Ok(())
    }
}

// ==============================================================================
// LEDGER ANCHOR
// ==============================================================================

/// Anchors a SHA-256 digest of the booking with an external ledger service.
pub struct LedgerAnchor {
    client: Client,
    url: String,
}

impl LedgerAnchor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    /// Hex digest over the serialized appointment and payment.
    pub fn digest(booking: &BookingConfirmation) -> Result<String> {
        let bytes = serde_json::to_vec(booking)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl BookingSideEffect for LedgerAnchor {
    fn name(&self) -> &'static str {
        "ledger-anchor"
    }

    async fn on_booked(&self, booking: &BookingConfirmation) -> Result<()> {
        let digest = Self::digest(booking)?;
        let body = json!({
            "record_type": "appointment",
            "record_id": booking.appointment.id,
            "payment_code": booking.payment.code,
            "hash": digest,
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(SIDE_EFFECT_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Anchoring service returned {}", response.status()));
        }

        debug!("Anchored appointment {} as {}", booking.appointment.id, digest);
        Ok(())
    }
}

// ==============================================================================
// DISPATCHER
// ==============================================================================

#[derive(Clone, Default)]
pub struct SideEffectDispatcher {
    effects: Vec<Arc<dyn BookingSideEffect>>,
}

impl SideEffectDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Webhook and anchoring effects for whichever URLs are configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut dispatcher = Self::new();
        if let Some(url) = &config.booking_webhook_url {
            dispatcher = dispatcher.with(Arc::new(WebhookNotifier::new(url.clone())));
        }
        if let Some(url) = &config.booking_anchor_url {
            dispatcher = dispatcher.with(Arc::new(LedgerAnchor::new(url.clone())));
        }
        dispatcher
    }

    pub fn with(mut self, effect: Arc<dyn BookingSideEffect>) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Spawns one task per effect. Failures are logged and go no further.
    pub fn dispatch(&self, booking: &BookingConfirmation) -> Vec<JoinHandle<()>> {
        let booking = Arc::new(booking.clone());

        self.effects
            .iter()
            .map(|effect| {
                let effect = Arc::clone(effect);
                let booking = Arc::clone(&booking);
                tokio::spawn(async move {
                    match effect.on_booked(&booking).await {
                        Ok(()) => info!("Side effect {} completed for appointment {}", effect.name(), booking.appointment.id),
                        Err(e) => error!(
                            "Side effect {} failed for appointment {}: {}",
                            effect.name(),
                            booking.appointment.id,
                            e
                        ),
                    }
                })
            })
            .collect()
    }
}
