//! In-memory `PilotStore` implementation.
//!
//! Holds tokens, daily counters, and generation history behind one async
//! mutex. State lives for the process lifetime; seed tokens come from the
//! `[[pilot_tokens]]` section of the config file.

use super::{GenerationRecord, PilotStore, PilotTokenRecord};
use crate::config::SeedToken;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    tokens: HashMap<String, PilotTokenRecord>,
    daily_counts: HashMap<(String, String), u32>,
    generations: Vec<GenerationRecord>,
}

/// Process-local store; cheap to clone behind an `Arc` at the server layer.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-loaded with configured pilot tokens.
    pub fn with_seed_tokens(seeds: &[SeedToken]) -> Self {
        let mut inner = Inner::default();
        for seed in seeds {
            inner.tokens.insert(
                seed.token_hash.clone(),
                PilotTokenRecord {
                    token_hash: seed.token_hash.clone(),
                    institution_id: seed.institution_id.clone(),
                    expires_at: seed.expires_at,
                    revoked_at: seed.revoked_at,
                    created_at: Utc::now(),
                },
            );
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Number of stored generation records (all institutions).
    pub async fn generation_count(&self) -> usize {
        self.inner.lock().await.generations.len()
    }
}

#[async_trait]
impl PilotStore for MemoryStore {
    async fn find_token(&self, token_hash: &str) -> Result<Option<PilotTokenRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.tokens.get(token_hash).cloned())
    }

    async fn insert_token(&self, record: PilotTokenRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn increment_daily_count(&self, institution_id: &str, day: &str) -> Result<u32> {
        let mut inner = self.inner.lock().await;
        let count = inner
            .daily_counts
            .entry((institution_id.to_string(), day.to_string()))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn record_generation(&self, record: GenerationRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.generations.push(record);
        Ok(())
    }

    async fn recent_concepts(&self, institution_id: &str, limit: usize) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .generations
            .iter()
            .rev()
            .filter(|record| record.institution_id == institution_id && record.validation_pass)
            .filter_map(|record| record.concept_entry.clone())
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn token(hash: &str, institution: &str) -> PilotTokenRecord {
        PilotTokenRecord {
            token_hash: hash.to_string(),
            institution_id: institution.to_string(),
            expires_at: Utc::now() + Duration::days(7),
            revoked_at: None,
            created_at: Utc::now(),
        }
    }

    fn generation(institution: &str, concept: Option<&str>, pass: bool) -> GenerationRecord {
        let mut record = GenerationRecord::new(institution, json!({}), false);
        record.concept_entry = concept.map(|c| c.to_string());
        record.validation_pass = pass;
        record
    }

    #[tokio::test]
    async fn test_find_token_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.find_token("h1").await.unwrap().is_none());

        store.insert_token(token("h1", "inst-1")).await.unwrap();
        let found = store.find_token("h1").await.unwrap().unwrap();
        assert_eq!(found.institution_id, "inst-1");
    }

    #[tokio::test]
    async fn test_seed_tokens_loaded() {
        let seeds = vec![SeedToken {
            token_hash: "seeded".to_string(),
            institution_id: "inst-9".to_string(),
            expires_at: Utc::now() + Duration::days(30),
            revoked_at: None,
        }];
        let store = MemoryStore::with_seed_tokens(&seeds);
        let found = store.find_token("seeded").await.unwrap().unwrap();
        assert_eq!(found.institution_id, "inst-9");
    }

    #[tokio::test]
    async fn test_daily_count_increments_per_institution_and_day() {
        let store = MemoryStore::new();
        assert_eq!(store.increment_daily_count("a", "2026-08-07").await.unwrap(), 1);
        assert_eq!(store.increment_daily_count("a", "2026-08-07").await.unwrap(), 2);
        // Different day and different institution count separately
        assert_eq!(store.increment_daily_count("a", "2026-08-08").await.unwrap(), 1);
        assert_eq!(store.increment_daily_count("b", "2026-08-07").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_concepts_newest_first_successful_only() {
        let store = MemoryStore::new();
        store
            .record_generation(generation("inst-1", Some("old concept"), true))
            .await
            .unwrap();
        store
            .record_generation(generation("inst-1", None, false))
            .await
            .unwrap();
        store
            .record_generation(generation("inst-2", Some("other institution"), true))
            .await
            .unwrap();
        store
            .record_generation(generation("inst-1", Some("new concept"), true))
            .await
            .unwrap();

        let concepts = store.recent_concepts("inst-1", 10).await.unwrap();
        assert_eq!(concepts, vec!["new concept", "old concept"]);

        let limited = store.recent_concepts("inst-1", 1).await.unwrap();
        assert_eq!(limited, vec!["new concept"]);
    }

    #[tokio::test]
    async fn test_generation_count() {
        let store = MemoryStore::new();
        assert_eq!(store.generation_count().await, 0);
        store
            .record_generation(generation("inst-1", None, false))
            .await
            .unwrap();
        assert_eq!(store.generation_count().await, 1);
    }
}
