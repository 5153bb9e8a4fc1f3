//! Unified configuration for sprout.
//!
//! Everything is read from a single `sprout.toml`, fully defaulted so the
//! binary runs with no file present. Layering: file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 4870
//!
//! [generation]
//! model = "gpt-4.1"
//! request_timeout_ms = 25000
//! transport_retries = 1
//! outline_retries = 2
//! final_retries = 1
//! novelty_retries = 1
//! novelty_threshold = 0.6
//!
//! [limits]
//! daily_generations = 10
//! recent_concepts_window = 10
//!
//! [domain]
//! safety_rules = ["No small parts for under-3s", "Adult supervision near water"]
//!
//! [domain.templates]
//! schema_version = "activity.v1"
//! required_sections = ["goal", "materials", "steps", "safety_notes"]
//! style_rules = ["short imperative sentences"]
//!
//! [domain.age_groups."3-4"]
//! label = "3 to 4 year olds"
//! development_focus = ["fine motor skills"]
//! constraints = ["no scissors without 1:1 supervision"]
//! pedagogical_notes = ["keep instructions to one step at a time"]
//!
//! [domain.themes.STEM]
//! label = "Early STEM"
//! learning_outcomes = ["cause and effect"]
//! suggested_activity_types = ["water play"]
//! materials_pool = ["measuring cups", "funnels"]
//!
//! [[pilot_tokens]]
//! token_hash = "…hex…"
//! institution_id = "11111111-1111-1111-1111-111111111111"
//! expires_at = "2027-01-01T00:00:00Z"
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Schema version stamped on every final activity document.
pub const ACTIVITY_SCHEMA_VERSION: &str = "activity.v1";

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    4870
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Generation pipeline settings: model, deadline, and retry budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    /// Model identifier sent to the text-generation API.
    #[serde(default = "default_model")]
    pub model: String,
    /// Wall-clock deadline for a single generation call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Transport-level retries inside the client (backoff, bounded).
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    /// Additional outline-stage attempts after the first.
    #[serde(default = "default_outline_retries")]
    pub outline_retries: u32,
    /// Additional final-stage attempts after the first.
    #[serde(default = "default_final_retries")]
    pub final_retries: u32,
    /// Whole-pipeline retries when the novelty gate rejects a candidate.
    #[serde(default = "default_novelty_retries")]
    pub novelty_retries: u32,
    /// Maximum Jaccard similarity tolerated against recent concepts.
    #[serde(default = "default_novelty_threshold")]
    pub novelty_threshold: f64,
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    25_000
}

fn default_transport_retries() -> u32 {
    1
}

fn default_outline_retries() -> u32 {
    2
}

fn default_final_retries() -> u32 {
    1
}

fn default_novelty_retries() -> u32 {
    1
}

fn default_novelty_threshold() -> f64 {
    0.6
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            request_timeout_ms: default_request_timeout_ms(),
            transport_retries: default_transport_retries(),
            outline_retries: default_outline_retries(),
            final_retries: default_final_retries(),
            novelty_retries: default_novelty_retries(),
            novelty_threshold: default_novelty_threshold(),
        }
    }
}

/// Per-tenant limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Generations allowed per institution per UTC day.
    #[serde(default = "default_daily_generations")]
    pub daily_generations: u32,
    /// How many recent concepts feed the novelty gate.
    #[serde(default = "default_recent_concepts_window")]
    pub recent_concepts_window: usize,
}

fn default_daily_generations() -> u32 {
    10
}

fn default_recent_concepts_window() -> usize {
    10
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            daily_generations: default_daily_generations(),
            recent_concepts_window: default_recent_concepts_window(),
        }
    }
}

/// Age-group metadata fed into the outline prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgeGroup {
    pub label: String,
    #[serde(default)]
    pub development_focus: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub pedagogical_notes: Vec<String>,
}

/// Theme metadata fed into the outline prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Theme {
    pub label: String,
    #[serde(default)]
    pub learning_outcomes: Vec<String>,
    #[serde(default)]
    pub suggested_activity_types: Vec<String>,
    #[serde(default)]
    pub materials_pool: Vec<String>,
}

/// Document template rules: required sections, style, and validation floors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub required_sections: Vec<String>,
    #[serde(default)]
    pub style_rules: Vec<String>,
    /// Minimum step-plan entries an outline must carry (floor 3).
    #[serde(default)]
    pub min_steps: Option<u32>,
    /// Minimum materials an outline must carry (floor 3).
    #[serde(default)]
    pub min_materials: Option<u32>,
    /// Allowed drift between summed step minutes and requested duration.
    #[serde(default)]
    pub time_tolerance_minutes: Option<u32>,
}

fn default_schema_version() -> String {
    ACTIVITY_SCHEMA_VERSION.to_string()
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            required_sections: Vec::new(),
            style_rules: Vec::new(),
            min_steps: None,
            min_materials: None,
            time_tolerance_minutes: None,
        }
    }
}

/// Static lookup tables the orchestrator treats as read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub age_groups: HashMap<String, AgeGroup>,
    #[serde(default)]
    pub themes: HashMap<String, Theme>,
    #[serde(default)]
    pub safety_rules: Vec<String>,
}

/// A pre-provisioned pilot token seeded into the store at startup.
///
/// Only the hash lives in configuration; raw tokens are handed out once at
/// mint time and never written down by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedToken {
    pub token_hash: String,
    pub institution_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// The complete sprout.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SproutToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default)]
    pub pilot_tokens: Vec<SeedToken>,
}

impl SproutToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sprout.toml")
    }

    /// Load from the given path, or fall back to defaults if the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Daily generation limit; `RATE_LIMIT_PER_DAY` overrides the file.
    pub fn daily_generations(&self) -> u32 {
        std::env::var("RATE_LIMIT_PER_DAY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.limits.daily_generations)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.domain.templates.schema_version != ACTIVITY_SCHEMA_VERSION {
            warnings.push(format!(
                "templates.schema_version is '{}' but this build emits '{}'",
                self.domain.templates.schema_version, ACTIVITY_SCHEMA_VERSION
            ));
        }

        if self.domain.age_groups.is_empty() {
            warnings.push("no age groups configured; every request will be rejected".to_string());
        }

        if self.domain.themes.is_empty() {
            warnings.push("no themes configured; every request will be rejected".to_string());
        }

        if !(0.0..=1.0).contains(&self.generation.novelty_threshold) {
            warnings.push(format!(
                "generation.novelty_threshold {} is outside [0.0, 1.0]",
                self.generation.novelty_threshold
            ));
        }

        for (floor, name) in [
            (self.domain.templates.min_steps, "min_steps"),
            (self.domain.templates.min_materials, "min_materials"),
        ] {
            if let Some(value) = floor {
                if value < 3 {
                    warnings.push(format!(
                        "templates.{} = {} is below the enforced floor of 3",
                        name, value
                    ));
                }
            }
        }

        warnings
    }
}
