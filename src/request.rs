//! Caller-supplied generation request and its shape validation.
//!
//! Validation runs before any token lookup or generation work; all failures
//! for one request are collected and reported together under a single
//! `REQUEST_INVALID` code.

use crate::config::DomainConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DURATION_OPTIONS: [u32; 3] = [30, 45, 60];
pub const GROUP_SIZE_MIN: u32 = 2;
pub const GROUP_SIZE_MAX: u32 = 30;
pub const PILOT_TOKEN_MIN_LENGTH: usize = 32;
pub const PILOT_TOKEN_MAX_LENGTH: usize = 128;

/// Requested classroom energy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    Calm,
    Medium,
    Active,
}

impl fmt::Display for EnergyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergyLevel::Calm => write!(f, "calm"),
            EnergyLevel::Medium => write!(f, "medium"),
            EnergyLevel::Active => write!(f, "active"),
        }
    }
}

/// Requested pedagogical framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurriculumStyle {
    #[serde(rename = "Play-based")]
    PlayBased,
    #[serde(rename = "Montessori-inspired")]
    MontessoriInspired,
    #[serde(rename = "Reggio-inspired")]
    ReggioInspired,
    Mixed,
}

impl fmt::Display for CurriculumStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurriculumStyle::PlayBased => write!(f, "Play-based"),
            CurriculumStyle::MontessoriInspired => write!(f, "Montessori-inspired"),
            CurriculumStyle::ReggioInspired => write!(f, "Reggio-inspired"),
            CurriculumStyle::Mixed => write!(f, "Mixed"),
        }
    }
}

/// One activity-generation request. Immutable once validated; owned by the
/// caller for the lifetime of a single orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateRequest {
    pub pilot_token: String,
    pub age_group: String,
    pub duration_minutes: u32,
    pub theme: String,
    pub group_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<EnergyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curriculum_style: Option<CurriculumStyle>,
    #[serde(default)]
    pub regenerate: bool,
}

/// Request-shape failure. Not retryable — the same payload will fail again.
#[derive(Debug, Error)]
#[error("{}", problems.join(" "))]
pub struct RequestError {
    pub problems: Vec<String>,
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        "REQUEST_INVALID"
    }

    pub fn retryable(&self) -> bool {
        false
    }
}

/// Check whether a pilot token has a plausible shape (length + charset).
/// This is a format gate only; real verification happens against the store.
pub fn is_plausible_token(token: &str) -> bool {
    (PILOT_TOKEN_MIN_LENGTH..=PILOT_TOKEN_MAX_LENGTH).contains(&token.len())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl GenerateRequest {
    /// Validate the request against the configured domain tables.
    ///
    /// Collects every problem rather than stopping at the first, so the
    /// caller can fix the whole payload in one round trip.
    pub fn validate(&self, domain: &DomainConfig) -> Result<(), RequestError> {
        let mut problems = Vec::new();

        if !is_plausible_token(self.pilot_token.trim()) {
            problems.push("Invalid pilot_token format.".to_string());
        }

        if !domain.age_groups.contains_key(self.age_group.trim()) {
            problems.push("Unsupported age_group.".to_string());
        }

        if !DURATION_OPTIONS.contains(&self.duration_minutes) {
            problems.push("Unsupported duration_minutes.".to_string());
        }

        if !domain.themes.contains_key(self.theme.trim()) {
            problems.push("Unsupported theme.".to_string());
        }

        if !(GROUP_SIZE_MIN..=GROUP_SIZE_MAX).contains(&self.group_size) {
            problems.push("group_size out of range.".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RequestError { problems })
        }
    }
}
