//! Persistence seam for pilot tokens, quota counters, and generation history.
//!
//! The orchestrator never touches storage; the HTTP layer drives this trait
//! around it. `MemoryStore` is the in-process implementation; a SQL-backed
//! store plugs in behind the same trait.

mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Stored pilot token. Only the hash is ever persisted.
#[derive(Debug, Clone)]
pub struct PilotTokenRecord {
    pub token_hash: String,
    pub institution_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One generation attempt, successful or not.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub institution_id: String,
    pub created_at: DateTime<Utc>,
    pub request_payload: Value,
    pub outline_json: Option<Value>,
    pub final_json: Option<Value>,
    /// `title + " " + concept`, recorded only for successful runs; feeds the
    /// novelty gate of future regenerations.
    pub concept_entry: Option<String>,
    pub validation_pass: bool,
    pub latency_ms: Option<u64>,
    pub model_name: Option<String>,
    pub regenerate_flag: bool,
    pub error_code: Option<String>,
}

impl GenerationRecord {
    /// Start a record for an institution; fields fill in as the run resolves.
    pub fn new(institution_id: &str, request_payload: Value, regenerate_flag: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            institution_id: institution_id.to_string(),
            created_at: Utc::now(),
            request_payload,
            outline_json: None,
            final_json: None,
            concept_entry: None,
            validation_pass: false,
            latency_ms: None,
            model_name: None,
            regenerate_flag,
            error_code: None,
        }
    }
}

/// Storage operations the service needs around an orchestration run.
#[async_trait]
pub trait PilotStore: Send + Sync {
    async fn find_token(&self, token_hash: &str) -> Result<Option<PilotTokenRecord>>;

    async fn insert_token(&self, record: PilotTokenRecord) -> Result<()>;

    /// Increment and return the generation count for `(institution, day)`.
    async fn increment_daily_count(&self, institution_id: &str, day: &str) -> Result<u32>;

    async fn record_generation(&self, record: GenerationRecord) -> Result<()>;

    /// Concept entries of the most recent successful generations, newest
    /// first, bounded by `limit`.
    async fn recent_concepts(&self, institution_id: &str, limit: usize) -> Result<Vec<String>>;
}
