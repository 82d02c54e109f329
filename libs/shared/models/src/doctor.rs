use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoctorStatus {
    #[serde(alias = "active")]
    Active,
    #[serde(alias = "inactive")]
    Inactive,
    #[serde(alias = "suspended")]
    Suspended,
}

/// The slice of a doctor record the booking path needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub status: DoctorStatus,
    pub consultation_fee: i64,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DoctorProfile {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn accepts_bookings(&self) -> bool {
        !self.is_deleted() && self.status == DoctorStatus::Active
    }
}
