//! Daily per-institution generation quota.
//!
//! Increment-then-check against the configured daily limit, keyed by UTC
//! day. The counter moves even for runs that later fail generation — the
//! quota meters attempts, not successes.

use crate::store::PilotStore;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Quota state after a successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limit: u32,
    pub count: u32,
    pub remaining: u32,
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Daily generation limit reached for this pilot token.")]
    Exhausted,
    #[error("quota store unavailable: {0}")]
    Store(String),
}

impl QuotaError {
    pub fn code(&self) -> &'static str {
        match self {
            QuotaError::Exhausted => "RATE_LIMITED",
            QuotaError::Store(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn retryable(&self) -> bool {
        // The counter resets at the next UTC day.
        matches!(self, QuotaError::Exhausted)
    }
}

/// UTC day key, `YYYY-MM-DD`.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Count this request against the institution's daily quota.
pub async fn enforce_daily_quota(
    store: &dyn PilotStore,
    institution_id: &str,
    limit: u32,
) -> Result<QuotaStatus, QuotaError> {
    let day = day_key(Utc::now());
    let count = store
        .increment_daily_count(institution_id, &day)
        .await
        .map_err(|err| QuotaError::Store(err.to_string()))?;

    if count > limit {
        return Err(QuotaError::Exhausted);
    }

    Ok(QuotaStatus {
        limit,
        count,
        remaining: limit.saturating_sub(count),
    })
}
