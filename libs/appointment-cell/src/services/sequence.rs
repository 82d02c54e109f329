// libs/appointment-cell/src/services/sequence.rs
use chrono::NaiveDate;
use tracing::debug;

use shared_database::PaymentRepository;
use shared_models::{AppError, ConflictKind};

const SEQUENCE_WIDTH: usize = 3;
const MAX_SEQUENCE: u32 = 999;

/// Issues payment reference codes shaped `PREFIX + YYYYMMDD + NNN`.
///
/// The next sequence is read inside the caller's booking transaction. Two
/// bookers that still race to the same code are separated by the store's
/// unique constraint on `payments.code`, which the coordinator retries.
#[derive(Debug, Clone)]
pub struct SequenceCodeGenerator {
    prefix: String,
}

impl SequenceCodeGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn day_prefix(&self, date: NaiveDate) -> String {
        format!("{}{}", self.prefix, date.format("%Y%m%d"))
    }

    pub fn format_code(&self, date: NaiveDate, sequence: u32) -> Result<String, AppError> {
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(AppError::conflict(
                ConflictKind::SequenceExhausted,
                format!("no payment codes left for {} (sequence {})", date, sequence),
            ));
        }
        Ok(format!("{}{:0width$}", self.day_prefix(date), sequence, width = SEQUENCE_WIDTH))
    }

    /// Sequence number of `code` if it was issued for `date` under this prefix.
    pub fn sequence_of(&self, code: &str, date: NaiveDate) -> Option<u32> {
        let suffix = code.strip_prefix(&self.day_prefix(date))?;
        if suffix.len() < SEQUENCE_WIDTH || !suffix.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }

    pub async fn next_code<S: PaymentRepository>(
        &self,
        store: &S,
        tx: &mut S::Tx,
        date: NaiveDate,
    ) -> Result<String, AppError> {
        let day_prefix = self.day_prefix(date);
        let current = store
            .max_code_with_prefix(tx, &day_prefix)
            .await?
            .and_then(|code| self.sequence_of(&code, date))
            .unwrap_or(0);

        let code = self.format_code(date, current + 1)?;
        debug!("Next payment code for {} is {}", day_prefix, code);
        Ok(code)
    }
}
