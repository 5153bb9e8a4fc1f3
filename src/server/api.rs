//! HTTP API: request parsing, auth, quota, orchestration, persistence.
//!
//! Every failure — collaborator-side or core — leaves the API as the same
//! `{ "error": { code, message, retryable } }` shape with a mapped status
//! code, so clients switch on `code` rather than on transport details.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{hash_token, mint_token, verify_pilot_token, PilotTokenError};
use crate::client::TextGenerator;
use crate::config::SproutToml;
use crate::errors::OrchestratorError;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::quota::{enforce_daily_quota, QuotaError};
use crate::request::{GenerateRequest, RequestError};
use crate::store::{GenerationRecord, PilotStore, PilotTokenRecord};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: Arc<dyn PilotStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub config: SproutToml,
    pub token_salt: String,
    /// Admin endpoints stay disabled unless a secret is configured.
    pub admin_secret: Option<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTokenRequest {
    pub institution_id: String,
    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

const TOKEN_EXPIRY_DEFAULT_DAYS: u32 = 14;
const TOKEN_EXPIRY_MAX_DAYS: u32 = 30;

// ── Error handling ────────────────────────────────────────────────────

/// Boundary error: fixed code + message + retryable flag + HTTP status.
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "REQUEST_INVALID",
            message: message.into(),
            retryable: false,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "ADMIN_FORBIDDEN",
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "UNKNOWN_ERROR",
            message: message.into(),
            retryable: false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "retryable": self.retryable,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: err.code(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

impl From<PilotTokenError> for ApiError {
    fn from(err: PilotTokenError) -> Self {
        let status = match &err {
            PilotTokenError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        let status = match &err {
            QuotaError::Exhausted => StatusCode::TOO_MANY_REQUESTS,
            QuotaError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/generate-activity", post(generate_activity))
        .route("/api/pilot-tokens", post(create_pilot_token))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// The full generation flow: parse → validate → auth → quota → orchestrate
/// → record → respond. Failed runs are recorded too, with their error code.
async fn generate_activity(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let request: GenerateRequest = serde_json::from_value(payload)
        .map_err(|err| ApiError::invalid_request(format!("Invalid request: {}", err)))?;
    request.validate(&state.config.domain)?;

    let identity =
        verify_pilot_token(state.store.as_ref(), &state.token_salt, &request.pilot_token).await?;

    let quota = enforce_daily_quota(
        state.store.as_ref(),
        &identity.institution_id,
        state.config.daily_generations(),
    )
    .await?;
    info!(
        institution_id = %identity.institution_id,
        used = quota.count,
        remaining = quota.remaining,
        "quota check passed"
    );

    let recent_concepts = if request.regenerate {
        state
            .store
            .recent_concepts(
                &identity.institution_id,
                state.config.limits.recent_concepts_window,
            )
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?
    } else {
        Vec::new()
    };

    let orchestrator = Orchestrator::new(
        state.generator.clone(),
        OrchestratorConfig::from_generation(&state.config.generation),
    );

    let mut record = GenerationRecord::new(
        &identity.institution_id,
        sanitized_request_json(&request),
        request.regenerate,
    );
    record.model_name = Some(state.config.generation.model.clone());

    let started = Instant::now();
    let result = orchestrator
        .run(&request, &state.config.domain, &recent_concepts)
        .await;
    record.latency_ms = Some(started.elapsed().as_millis() as u64);

    match result {
        Ok(outcome) => {
            record.validation_pass = true;
            record.outline_json = serde_json::to_value(&outcome.outline).ok();
            record.final_json = serde_json::to_value(&outcome.activity).ok();
            record.concept_entry = Some(outcome.concept_entry());
            persist_record(&state, record).await;

            Ok(Json(json!({
                "schema_version": outcome.activity.schema_version,
                "activity": outcome.activity.activity,
                "outline": outcome.outline,
            })))
        }
        Err(err) => {
            record.error_code = Some(err.code().to_string());
            persist_record(&state, record).await;
            Err(ApiError::from(err))
        }
    }
}

/// Record a generation outcome; a storage hiccup must not mask the result
/// already produced, so failures here are logged and dropped.
async fn persist_record(state: &AppState, record: GenerationRecord) {
    if let Err(err) = state.store.record_generation(record).await {
        warn!(error = %err, "failed to record generation");
    }
}

/// Serialized request payload for the generation log, minus the credential.
fn sanitized_request_json(request: &GenerateRequest) -> Value {
    let mut value = serde_json::to_value(request).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.remove("pilot_token");
    }
    value
}

/// Admin endpoint: mint a pilot token for an institution. The raw token is
/// returned exactly once; only its hash is stored.
async fn create_pilot_token(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let payload: CreateTokenRequest = serde_json::from_value(payload)
        .map_err(|err| ApiError::invalid_request(format!("Invalid request: {}", err)))?;

    let expires_in_days = payload.expires_in_days.unwrap_or(TOKEN_EXPIRY_DEFAULT_DAYS);
    if expires_in_days == 0 || expires_in_days > TOKEN_EXPIRY_MAX_DAYS {
        return Err(ApiError::invalid_request(format!(
            "expires_in_days must be between 1 and {}.",
            TOKEN_EXPIRY_MAX_DAYS
        )));
    }

    let pilot_token = mint_token();
    let token_hash = hash_token(&state.token_salt, &pilot_token);
    let expires_at = Utc::now() + Duration::days(expires_in_days as i64);

    state
        .store
        .insert_token(PilotTokenRecord {
            token_hash,
            institution_id: payload.institution_id.clone(),
            expires_at,
            revoked_at: None,
            created_at: Utc::now(),
        })
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;

    info!(institution_id = %payload.institution_id, expires_in_days, "pilot token minted");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "pilot_token": pilot_token,
            "institution_id": payload.institution_id,
            "expires_at": expires_at.to_rfc3339(),
        })),
    ))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_secret.as_deref() else {
        return Err(ApiError::forbidden(
            "Admin endpoints are disabled; set ADMIN_SECRET to enable them.",
        ));
    };

    let presented = headers
        .get("x-admin-secret")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if presented != expected {
        return Err(ApiError::forbidden("Invalid admin secret."));
    }

    Ok(())
}
