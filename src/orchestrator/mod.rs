//! The generation state machine.
//!
//! One run walks: outline stage → validate → final stage → validate →
//! optional novelty gate. Each stage re-issues an identical prompt up to its
//! attempt budget when the model returns malformed or invalid content;
//! transport-classified errors escape immediately with the transport's own
//! retryable flag. A novelty rejection earns at most one whole-pipeline
//! retry — a different concept requires a fresh outline.
//!
//! The orchestrator holds no state across runs; every invocation is an
//! independent pass parameterized by the request, the domain configuration,
//! and the caller-supplied recent-concepts list. Dropping the returned
//! future cancels any in-flight generation call; partial stage state never
//! escapes.

use crate::client::{CallOptions, ResponseEnvelope, TextGenerator};
use crate::config::{DomainConfig, GenerationSection, ACTIVITY_SCHEMA_VERSION};
use crate::errors::OrchestratorError;
use crate::novelty::{check_novelty, NoveltyReport, DEFAULT_NOVELTY_THRESHOLD};
use crate::prompts::{build_final_prompt, build_outline_prompt, StagePrompt};
use crate::request::GenerateRequest;
use crate::schema::{
    validate_final_activity, validate_outline, FinalActivity, Outline, ValidationLimits,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_OUTLINE_RETRIES: u32 = 2;
const DEFAULT_FINAL_RETRIES: u32 = 1;
const DEFAULT_NOVELTY_RETRIES: u32 = 1;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 25_000;
const DEFAULT_TRANSPORT_RETRIES: u32 = 1;

/// Budgets and thresholds for one orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Additional outline-stage attempts after the first.
    pub outline_retries: u32,
    /// Additional final-stage attempts after the first.
    pub final_retries: u32,
    /// Whole-pipeline retries after a novelty rejection.
    pub novelty_retries: u32,
    /// Maximum tolerated similarity against recent concepts.
    pub novelty_threshold: f64,
    /// Deadline for a single generation call.
    pub call_timeout: Duration,
    /// Transport retries delegated to the client.
    pub transport_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            outline_retries: DEFAULT_OUTLINE_RETRIES,
            final_retries: DEFAULT_FINAL_RETRIES,
            novelty_retries: DEFAULT_NOVELTY_RETRIES,
            novelty_threshold: DEFAULT_NOVELTY_THRESHOLD,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
        }
    }
}

impl OrchestratorConfig {
    /// Build from the `[generation]` config section.
    pub fn from_generation(section: &GenerationSection) -> Self {
        Self {
            outline_retries: section.outline_retries,
            final_retries: section.final_retries,
            novelty_retries: section.novelty_retries,
            novelty_threshold: section.novelty_threshold,
            call_timeout: Duration::from_millis(section.request_timeout_ms),
            transport_retries: section.transport_retries,
        }
    }

    pub fn with_outline_retries(mut self, retries: u32) -> Self {
        self.outline_retries = retries;
        self
    }

    pub fn with_final_retries(mut self, retries: u32) -> Self {
        self.final_retries = retries;
        self
    }

    pub fn with_novelty_threshold(mut self, threshold: f64) -> Self {
        self.novelty_threshold = threshold;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Everything a successful run hands back to the caller.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub activity: FinalActivity,
    pub outline: Outline,
    /// Present only when the novelty gate actually ran.
    pub novelty: Option<NoveltyReport>,
    /// Outline-stage attempts spent in the winning pipeline run.
    pub outline_attempts: u32,
    /// Final-stage attempts spent in the winning pipeline run.
    pub final_attempts: u32,
    /// Full pipeline passes, 1 unless the novelty gate forced a redo.
    pub pipeline_runs: u32,
}

impl GenerationOutcome {
    /// The string recorded for future novelty comparisons: the same
    /// `title + " " + concept` shape the gate scores candidates with.
    pub fn concept_entry(&self) -> String {
        format!(
            "{} {}",
            self.activity.activity.title, self.outline.activity_concept
        )
        .trim()
        .to_string()
    }
}

/// Drives the two-stage generation pipeline against an injected generator.
pub struct Orchestrator {
    client: Arc<dyn TextGenerator>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Self {
        Self { client, config }
    }

    /// Run one full orchestration for a validated request.
    ///
    /// `recent_concepts` feeds both the avoid-list in the outline prompt and
    /// the novelty gate; the gate only arms when the caller requested
    /// regeneration and at least one recent concept exists.
    pub async fn run(
        &self,
        request: &GenerateRequest,
        domain: &DomainConfig,
        recent_concepts: &[String],
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let run_id = Uuid::new_v4();
        let limits = ValidationLimits::from_template(&domain.templates);
        let gate_armed = request.regenerate && !recent_concepts.is_empty();
        let pipeline_budget = if gate_armed {
            self.config.novelty_retries
        } else {
            0
        };

        info!(
            %run_id,
            age_group = %request.age_group,
            theme = %request.theme,
            regenerate = request.regenerate,
            gate_armed,
            "orchestration start"
        );

        let mut pipeline_run = 0u32;
        loop {
            let (outline, outline_attempts) = self
                .run_outline_stage(run_id, request, domain, recent_concepts, limits)
                .await?;

            let (activity, final_attempts) = self
                .run_final_stage(run_id, request, &outline, limits)
                .await?;

            if !gate_armed {
                info!(%run_id, outline_attempts, final_attempts, "orchestration done");
                return Ok(GenerationOutcome {
                    activity,
                    outline,
                    novelty: None,
                    outline_attempts,
                    final_attempts,
                    pipeline_runs: pipeline_run + 1,
                });
            }

            let report = check_novelty(
                &activity.activity.title,
                &outline.activity_concept,
                recent_concepts,
                self.config.novelty_threshold,
            );

            if report.approved {
                info!(
                    %run_id,
                    score = report.score,
                    pipeline_runs = pipeline_run + 1,
                    "novelty gate approved"
                );
                return Ok(GenerationOutcome {
                    activity,
                    outline,
                    novelty: Some(report),
                    outline_attempts,
                    final_attempts,
                    pipeline_runs: pipeline_run + 1,
                });
            }

            warn!(
                %run_id,
                score = report.score,
                most_similar = report.most_similar.as_deref().unwrap_or(""),
                pipeline_run = pipeline_run + 1,
                "novelty gate rejected candidate"
            );

            if pipeline_run >= pipeline_budget {
                return Err(OrchestratorError::NoveltyRejected {
                    score: report.score,
                    most_similar: report.most_similar,
                });
            }
            pipeline_run += 1;
        }
    }

    async fn run_outline_stage(
        &self,
        run_id: Uuid,
        request: &GenerateRequest,
        domain: &DomainConfig,
        recent_concepts: &[String],
        limits: ValidationLimits,
    ) -> Result<(Outline, u32), OrchestratorError> {
        let attempts = self.config.outline_retries + 1;
        let mut violations = Vec::new();

        for attempt in 1..=attempts {
            // The prompt is a pure function of its inputs, so every attempt
            // reissues identical text.
            let prompt = build_outline_prompt(request, domain, recent_concepts);
            match self.attempt_stage(run_id, "outline", attempt, &prompt).await? {
                Ok(value) => match validate_outline(&value, limits) {
                    Ok(outline) => {
                        info!(%run_id, stage = "outline", attempt, "stage accepted");
                        return Ok((outline, attempt));
                    }
                    Err(errors) => {
                        warn!(
                            %run_id,
                            stage = "outline",
                            attempt,
                            violation_count = errors.len(),
                            "stage output rejected"
                        );
                        violations
                            .extend(errors.into_iter().map(|e| format!("attempt {}: {}", attempt, e)));
                    }
                },
                Err(problem) => {
                    warn!(%run_id, stage = "outline", attempt, problem = %problem, "stage output unusable");
                    violations.push(format!("attempt {}: {}", attempt, problem));
                }
            }
        }

        Err(OrchestratorError::OutlineValidation {
            attempts,
            violations,
        })
    }

    async fn run_final_stage(
        &self,
        run_id: Uuid,
        request: &GenerateRequest,
        outline: &Outline,
        limits: ValidationLimits,
    ) -> Result<(FinalActivity, u32), OrchestratorError> {
        let attempts = self.config.final_retries + 1;
        let mut violations = Vec::new();

        for attempt in 1..=attempts {
            let prompt = build_final_prompt(request, outline, ACTIVITY_SCHEMA_VERSION);
            match self.attempt_stage(run_id, "final", attempt, &prompt).await? {
                Ok(value) => match validate_final_activity(&value, limits) {
                    Ok(activity) => {
                        info!(%run_id, stage = "final", attempt, "stage accepted");
                        return Ok((activity, attempt));
                    }
                    Err(errors) => {
                        warn!(
                            %run_id,
                            stage = "final",
                            attempt,
                            violation_count = errors.len(),
                            "stage output rejected"
                        );
                        violations
                            .extend(errors.into_iter().map(|e| format!("attempt {}: {}", attempt, e)));
                    }
                },
                Err(problem) => {
                    warn!(%run_id, stage = "final", attempt, problem = %problem, "stage output unusable");
                    violations.push(format!("attempt {}: {}", attempt, problem));
                }
            }
        }

        Err(OrchestratorError::FinalValidation {
            attempts,
            violations,
        })
    }

    /// One generation call for a stage. The outer `Result` carries transport
    /// errors (which end the stage immediately); the inner one carries
    /// content problems that consume stage budget.
    async fn attempt_stage(
        &self,
        run_id: Uuid,
        stage: &str,
        attempt: u32,
        prompt: &StagePrompt,
    ) -> Result<Result<Value, String>, OrchestratorError> {
        let options = CallOptions::new(
            run_id,
            self.config.call_timeout,
            self.config.transport_retries,
        );

        info!(%run_id, stage, attempt, "stage attempt start");
        let envelope = self.client.generate(prompt, &options).await?;
        Ok(extract_candidate(&envelope))
    }
}

/// Pull the candidate JSON value out of a response envelope.
fn extract_candidate(envelope: &ResponseEnvelope) -> Result<Value, String> {
    let Some(text) = envelope.output_text() else {
        return Err("response contained no textual output".to_string());
    };

    parse_json_payload(&text).ok_or_else(|| "response payload was not valid JSON".to_string())
}

/// Parse a textual payload as JSON, salvaging the first balanced object when
/// the model wrapped it in prose or a code fence despite instructions.
fn parse_json_payload(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    extract_json(text).and_then(|candidate| serde_json::from_str(&candidate).ok())
}

/// Extract JSON from output that may contain markdown or surrounding text.
fn extract_json(output: &str) -> Option<String> {
    // Fenced ```json block
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    // Generic fenced block containing an object
    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```") {
            if let Some(json_start) = after_marker[..end].find('{') {
                let content = &after_marker[json_start..end];
                if !content.is_empty() {
                    return Some(content.trim().to_string());
                }
            }
        }
    }

    // First balanced raw object
    if let Some(start) = output.find('{') {
        let mut depth = 0usize;
        for (index, c) in output[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(output[start..start + index + 1].to_string());
                    }
                }
                _ => {}
            }
        }
    }

    None
}
