//! End-to-end tests: shipped configuration through the HTTP surface and the
//! full generation pipeline, with a scripted generator standing in for the
//! external text-generation capability.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use sprout::auth::{hash_token, mint_token};
use sprout::client::{CallOptions, ResponseEnvelope, TextGenerator};
use sprout::config::SproutToml;
use sprout::errors::ClientError;
use sprout::prompts::StagePrompt;
use sprout::server::{build_router, AppState};
use sprout::store::{MemoryStore, PilotStore, PilotTokenRecord};

const SALT: &str = "integration-test-salt-0123456789";
const SHIPPED_CONFIG: &str = include_str!("../sprout.toml");

struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<ResponseEnvelope, ClientError>>>,
    calls: Mutex<u32>,
}

impl ScriptedGenerator {
    fn new(responses: Vec<Result<ResponseEnvelope, ClientError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _prompt: &StagePrompt,
        _options: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::failure("script exhausted", false)))
    }
}

fn outline_text(concept: &str) -> String {
    json!({
        "activity_concept": concept,
        "learning_outcomes": ["prediction and testing"],
        "materials": ["measuring cups", "funnels", "water tub"],
        "step_plan": [
            {"step": 1, "label": "set up the water station", "time_minutes": 5},
            {"step": 2, "label": "pour and measure", "time_minutes": 25},
            {"step": 3, "label": "compare results", "time_minutes": 15}
        ],
        "adaptations_plan": {"easier": ["bigger cups"], "harder": ["predict before pouring"]},
        "safety_checks": ["mop spills", "no glass containers", "adult at the station"]
    })
    .to_string()
}

fn final_text(title: &str) -> String {
    json!({
        "schema_version": "activity.v1",
        "activity": {
            "title": title,
            "age_group": "3-4",
            "duration_minutes": 45,
            "group_size": 12,
            "theme": "STEM",
            "goal": "Explore volume and measurement with water",
            "learning_outcomes": ["prediction and testing"],
            "materials": ["measuring cups", "funnels", "water tub"],
            "steps": [
                {"step": 1, "instruction": "Set up the water station together", "time_minutes": 5},
                {"step": 2, "instruction": "Let each child pour and measure", "time_minutes": 25},
                {"step": 3, "instruction": "Compare who filled the most cups", "time_minutes": 15}
            ],
            "adaptations": {"easier": ["bigger cups"], "harder": ["predict before pouring"]},
            "backup_plan": "Dry measuring with rice if water is not possible",
            "teacher_tips": ["keep towels within reach"],
            "safety_notes": ["mop spills", "no glass containers", "adult at the station"]
        }
    })
    .to_string()
}

fn ok_text(text: String) -> Result<ResponseEnvelope, ClientError> {
    Ok(ResponseEnvelope::from_text(text))
}

async fn build_state(
    generator: Arc<ScriptedGenerator>,
) -> (Arc<AppState>, String, Arc<MemoryStore>) {
    let config = SproutToml::parse(SHIPPED_CONFIG).unwrap();
    let store = Arc::new(MemoryStore::new());
    let token = mint_token();
    store
        .insert_token(PilotTokenRecord {
            token_hash: hash_token(SALT, &token),
            institution_id: "11111111-1111-1111-1111-111111111111".to_string(),
            expires_at: Utc::now() + Duration::days(7),
            revoked_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let state = Arc::new(AppState {
        store: store.clone(),
        generator,
        config,
        token_salt: SALT.to_string(),
        admin_secret: None,
    });
    (state, token, store)
}

async fn post_generate(state: Arc<AppState>, payload: Value) -> (StatusCode, Value) {
    let router = build_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/generate-activity")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn generate_payload(token: &str, regenerate: bool) -> Value {
    json!({
        "pilot_token": token,
        "age_group": "3-4",
        "duration_minutes": 45,
        "theme": "STEM",
        "group_size": 12,
        "energy_level": "calm",
        "curriculum_style": "Play-based",
        "regenerate": regenerate
    })
}

#[test]
fn shipped_config_parses_cleanly() {
    let config = SproutToml::parse(SHIPPED_CONFIG).unwrap();
    assert!(config.validate().is_empty());
    assert_eq!(config.server.port, 4870);
    assert_eq!(config.domain.age_groups.len(), 3);
    assert_eq!(config.domain.themes.len(), 4);
    assert_eq!(config.domain.safety_rules.len(), 5);
}

#[tokio::test]
async fn full_generation_flow_over_http() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        ok_text(outline_text("water measuring station")),
        ok_text(final_text("Cup by Cup")),
    ]));
    let (state, token, store) = build_state(generator.clone()).await;

    let (status, body) = post_generate(state, generate_payload(&token, false)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schema_version"], "activity.v1");
    assert_eq!(body["activity"]["title"], "Cup by Cup");
    assert_eq!(body["activity"]["duration_minutes"], 45);
    assert_eq!(body["outline"]["activity_concept"], "water measuring station");
    assert_eq!(generator.calls(), 2);

    // The run was recorded and its concept is now visible to the novelty gate.
    let concepts = store
        .recent_concepts("11111111-1111-1111-1111-111111111111", 10)
        .await
        .unwrap();
    assert_eq!(concepts, vec!["Cup by Cup water measuring station"]);
}

#[tokio::test]
async fn regenerate_flow_retries_pipeline_and_diverges() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        // First request (regenerate=false) seeds the history.
        ok_text(outline_text("water measuring station")),
        ok_text(final_text("Cup by Cup")),
        // Second request (regenerate=true): first pipeline repeats the old
        // concept, the retry produces something fresh.
        ok_text(outline_text("water measuring station")),
        ok_text(final_text("Cup by Cup")),
        ok_text(outline_text("shadow puppet theater")),
        ok_text(final_text("Shadow Stories")),
    ]));
    let (state, token, _store) = build_state(generator.clone()).await;

    let (status, _body) = post_generate(state.clone(), generate_payload(&token, false)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_generate(state, generate_payload(&token, true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activity"]["title"], "Shadow Stories");
    // 2 calls for the seed run + 4 for the regeneration (one rejected
    // pipeline, one approved).
    assert_eq!(generator.calls(), 6);
}

#[tokio::test]
async fn regenerate_flow_fails_when_model_keeps_repeating() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        ok_text(outline_text("water measuring station")),
        ok_text(final_text("Cup by Cup")),
        // Regeneration: both pipeline attempts repeat the stored concept.
        ok_text(outline_text("water measuring station")),
        ok_text(final_text("Cup by Cup")),
        ok_text(outline_text("water measuring station")),
        ok_text(final_text("Cup by Cup")),
    ]));
    let (state, token, _store) = build_state(generator.clone()).await;

    post_generate(state.clone(), generate_payload(&token, false)).await;
    let (status, body) = post_generate(state, generate_payload(&token, true)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "NOVELTY_CHECK_FAILED");
    assert_eq!(body["error"]["retryable"], false);
    assert_eq!(generator.calls(), 6);
}

#[tokio::test]
async fn outline_retry_then_success_over_http() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        ok_text("I'd be happy to help, but first...".to_string()),
        ok_text(outline_text("water measuring station")),
        ok_text(final_text("Cup by Cup")),
    ]));
    let (state, token, _store) = build_state(generator.clone()).await;

    let (status, body) = post_generate(state, generate_payload(&token, false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activity"]["title"], "Cup by Cup");
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn transport_failure_surfaces_with_retryable_flag() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Err(ClientError::failure(
        "upstream 503",
        true,
    ))]));
    let (state, token, store) = build_state(generator).await;

    let (status, body) = post_generate(state, generate_payload(&token, false)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "OPENAI_ERROR");
    assert_eq!(body["error"]["retryable"], true);

    // Failed runs still land in the generation log.
    assert_eq!(store.generation_count().await, 1);
    // But contribute nothing to the novelty history.
    let concepts = store
        .recent_concepts("11111111-1111-1111-1111-111111111111", 10)
        .await
        .unwrap();
    assert!(concepts.is_empty());
}
