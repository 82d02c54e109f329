use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub scheduling: SchedulingConfig,
    pub booking_webhook_url: Option<String>,
    pub booking_anchor_url: Option<String>,
}

/// Accepted lead times, from none up to a year.
pub const BOOKING_LEAD_MINUTES_RANGE: RangeInclusive<i64> = 0..=525_600;
/// Accepted booking horizons, up to ten years.
pub const BOOKING_AHEAD_DAYS_RANGE: RangeInclusive<i64> = 0..=3_650;

/// Booking rules and commit tuning shared by the schedule and appointment cells.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulingConfig {
    /// Earliest bookable moment, measured from now.
    pub min_booking_lead_minutes: i64,
    /// Latest bookable date, measured from now.
    pub max_booking_ahead_days: i64,
    pub payment_code_prefix: String,
    pub transaction_timeout_ms: u64,
    /// Upper bound on booking commit attempts when the payment code collides.
    pub max_commit_attempts: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_booking_lead_minutes: 60,
            max_booking_ahead_days: 30,
            payment_code_prefix: "LH".to_string(),
            transaction_timeout_ms: 5_000,
            max_commit_attempts: 3,
        }
    }
}

impl SchedulingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            min_booking_lead_minutes: bounded_or(
                "BOOKING_MIN_LEAD_MINUTES",
                parse_or("BOOKING_MIN_LEAD_MINUTES", defaults.min_booking_lead_minutes),
                defaults.min_booking_lead_minutes,
                BOOKING_LEAD_MINUTES_RANGE,
            ),
            max_booking_ahead_days: bounded_or(
                "BOOKING_MAX_AHEAD_DAYS",
                parse_or("BOOKING_MAX_AHEAD_DAYS", defaults.max_booking_ahead_days),
                defaults.max_booking_ahead_days,
                BOOKING_AHEAD_DAYS_RANGE,
            ),
            payment_code_prefix: env::var("PAYMENT_CODE_PREFIX")
                .unwrap_or_else(|_| defaults.payment_code_prefix.clone()),
            transaction_timeout_ms: parse_or("BOOKING_TX_TIMEOUT_MS", defaults.transaction_timeout_ms),
            max_commit_attempts: parse_or("BOOKING_MAX_COMMIT_ATTEMPTS", defaults.max_commit_attempts).max(1),
        }
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// Lead time clamped into [`BOOKING_LEAD_MINUTES_RANGE`].
    pub fn min_booking_lead_minutes_bounded(&self) -> i64 {
        clamp_into(self.min_booking_lead_minutes, &BOOKING_LEAD_MINUTES_RANGE)
    }

    /// Horizon clamped into [`BOOKING_AHEAD_DAYS_RANGE`].
    pub fn max_booking_ahead_days_bounded(&self) -> i64 {
        clamp_into(self.max_booking_ahead_days, &BOOKING_AHEAD_DAYS_RANGE)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            scheduling: SchedulingConfig::from_env(),
            booking_webhook_url: env::var("BOOKING_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
            booking_anchor_url: env::var("BOOKING_ANCHOR_URL").ok().filter(|v| !v.is_empty()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - doctor directory will be unreachable");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

fn parse_or<T: FromStr + Copy + Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn bounded_or<T: PartialOrd + Copy + Display>(key: &str, value: T, default: T, range: RangeInclusive<T>) -> T {
    if range.contains(&value) {
        return value;
    }
    warn!(
        "{} value {} is outside {}..={}, using default {}",
        key,
        value,
        range.start(),
        range.end(),
        default
    );
    default
}

fn clamp_into(value: i64, range: &RangeInclusive<i64>) -> i64 {
    value.clamp(*range.start(), *range.end())
}
