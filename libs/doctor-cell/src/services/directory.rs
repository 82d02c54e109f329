// libs/doctor-cell/src/services/directory.rs
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_database::{DoctorLookup, StoreError};
use shared_models::DoctorProfile;

/// `DoctorLookup` over the Supabase `doctors` table.
pub struct SupabaseDoctorDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseDoctorDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl DoctorLookup for SupabaseDoctorDirectory {
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<DoctorProfile>, StoreError> {
        debug!("Looking up doctor {}", doctor_id);

        // Soft-deleted rows are fetched too; the booking path decides what deleted means.
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&select=id,status,consultation_fee,deleted_at",
            doctor_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| {
                warn!("Doctor directory request failed for {}: {}", doctor_id, e);
                StoreError::Backend(format!("doctor directory: {}", e))
            })?;

        let Some(row) = result.into_iter().next() else {
            debug!("Doctor {} not found in directory", doctor_id);
            return Ok(None);
        };

        let profile: DoctorProfile = serde_json::from_value(row)
            .map_err(|e| StoreError::Backend(format!("Failed to parse doctor {}: {}", doctor_id, e)))?;

        Ok(Some(profile))
    }
}
