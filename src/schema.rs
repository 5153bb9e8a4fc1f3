//! Outline and final-activity document schemas plus their validators.
//!
//! Validation runs in two passes. The structural pass walks the raw JSON and
//! collects every shape violation (missing keys, wrong types, unexpected keys
//! on the final document); if anything fails, domain checks are skipped
//! entirely. The domain pass then enforces minimum counts and the duration
//! tolerance, again collecting all violations before returning.
//!
//! A typed `Outline` or `FinalActivity` only ever exists after both passes
//! succeed — no partially validated artifact escapes this module.

use crate::config::{TemplateConfig, ACTIVITY_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One planned step inside a stage-1 outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineStep {
    pub step: u32,
    pub label: String,
    pub time_minutes: u32,
}

/// Easier/harder variants of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationPlan {
    pub easier: Vec<String>,
    pub harder: Vec<String>,
}

/// Stage-1 planning artifact. Consumed only by the stage-2 prompt and the
/// novelty comparison; never persisted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub activity_concept: String,
    pub learning_outcomes: Vec<String>,
    pub materials: Vec<String>,
    pub step_plan: Vec<OutlineStep>,
    pub adaptations_plan: AdaptationPlan,
    pub safety_checks: Vec<String>,
}

/// One instruction step inside the final document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStep {
    pub step: u32,
    pub instruction: String,
    pub time_minutes: u32,
}

/// Body of the final activity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityBody {
    pub title: String,
    pub age_group: String,
    pub duration_minutes: u32,
    pub group_size: u32,
    pub theme: String,
    pub goal: String,
    pub learning_outcomes: Vec<String>,
    pub materials: Vec<String>,
    pub steps: Vec<ActivityStep>,
    pub adaptations: AdaptationPlan,
    pub backup_plan: String,
    pub teacher_tips: Vec<String>,
    pub safety_notes: Vec<String>,
}

/// Schema-versioned terminal artifact returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalActivity {
    pub schema_version: String,
    pub activity: ActivityBody,
}

/// Domain-rule floors applied after structural validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub min_materials: u32,
    pub min_steps: u32,
    pub min_safety_checks: u32,
    pub time_tolerance_minutes: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            min_materials: 3,
            min_steps: 3,
            min_safety_checks: 3,
            time_tolerance_minutes: 10,
        }
    }
}

impl ValidationLimits {
    /// Derive limits from template configuration. Configured floors may raise
    /// the minimums but never drop them below the defaults.
    pub fn from_template(template: &TemplateConfig) -> Self {
        let defaults = Self::default();
        Self {
            min_materials: template
                .min_materials
                .map_or(defaults.min_materials, |v| v.max(defaults.min_materials)),
            min_steps: template
                .min_steps
                .map_or(defaults.min_steps, |v| v.max(defaults.min_steps)),
            min_safety_checks: defaults.min_safety_checks,
            time_tolerance_minutes: template
                .time_tolerance_minutes
                .unwrap_or(defaults.time_tolerance_minutes),
        }
    }
}

// ── Structural checking helpers ───────────────────────────────────────

fn as_object<'a>(value: &'a Value, what: &str, violations: &mut Vec<String>) -> Option<&'a Map<String, Value>> {
    match value.as_object() {
        Some(map) => Some(map),
        None => {
            violations.push(format!("{} must be a JSON object", what));
            None
        }
    }
}

fn require_string(map: &Map<String, Value>, key: &str, path: &str, violations: &mut Vec<String>) {
    match map.get(key) {
        None => violations.push(format!("{} is missing", path)),
        Some(Value::String(_)) => {}
        Some(_) => violations.push(format!("{} must be a string", path)),
    }
}

fn require_uint(map: &Map<String, Value>, key: &str, path: &str, violations: &mut Vec<String>) {
    match map.get(key) {
        None => violations.push(format!("{} is missing", path)),
        Some(value) if value.as_u64().is_some_and(|v| v <= u32::MAX as u64) => {}
        Some(_) => violations.push(format!("{} must be a non-negative integer", path)),
    }
}

fn require_string_array(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Vec<String>,
) {
    match map.get(key) {
        None => violations.push(format!("{} is missing", path)),
        Some(Value::Array(items)) => {
            if items.iter().any(|item| !item.is_string()) {
                violations.push(format!("{} must contain only strings", path));
            }
        }
        Some(_) => violations.push(format!("{} must be an array of strings", path)),
    }
}

/// Check an array of `{step, <text_key>, time_minutes}` objects.
fn require_step_array(
    map: &Map<String, Value>,
    key: &str,
    text_key: &str,
    path: &str,
    violations: &mut Vec<String>,
) {
    let items = match map.get(key) {
        None => {
            violations.push(format!("{} is missing", path));
            return;
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            violations.push(format!("{} must be an array", path));
            return;
        }
    };

    for (index, item) in items.iter().enumerate() {
        let entry_path = format!("{}[{}]", path, index);
        if let Some(entry) = as_object(item, &entry_path, violations) {
            require_uint(entry, "step", &format!("{}.step", entry_path), violations);
            require_string(
                entry,
                text_key,
                &format!("{}.{}", entry_path, text_key),
                violations,
            );
            require_uint(
                entry,
                "time_minutes",
                &format!("{}.time_minutes", entry_path),
                violations,
            );
        }
    }
}

fn require_adaptations(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Vec<String>,
) {
    match map.get(key) {
        None => violations.push(format!("{} is missing", path)),
        Some(value) => {
            if let Some(inner) = as_object(value, path, violations) {
                require_string_array(inner, "easier", &format!("{}.easier", path), violations);
                require_string_array(inner, "harder", &format!("{}.harder", path), violations);
            }
        }
    }
}

fn reject_unexpected_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    path: &str,
    violations: &mut Vec<String>,
) {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            violations.push(format!("{} contains unexpected key `{}`", path, key));
        }
    }
}

// ── Outline validation ────────────────────────────────────────────────

const OUTLINE_KEYS: [&str; 6] = [
    "activity_concept",
    "learning_outcomes",
    "materials",
    "step_plan",
    "adaptations_plan",
    "safety_checks",
];

/// Validate a raw stage-1 response value into a typed `Outline`.
///
/// Returns every violation found in the failing pass; structural failures
/// suppress domain checks.
pub fn validate_outline(value: &Value, limits: ValidationLimits) -> Result<Outline, Vec<String>> {
    let mut violations = Vec::new();

    let Some(map) = as_object(value, "outline", &mut violations) else {
        return Err(violations);
    };

    require_string(map, "activity_concept", "activity_concept", &mut violations);
    require_string_array(map, "learning_outcomes", "learning_outcomes", &mut violations);
    require_string_array(map, "materials", "materials", &mut violations);
    require_step_array(map, "step_plan", "label", "step_plan", &mut violations);
    require_adaptations(map, "adaptations_plan", "adaptations_plan", &mut violations);
    require_string_array(map, "safety_checks", "safety_checks", &mut violations);

    if !violations.is_empty() {
        return Err(violations);
    }

    // Tolerated extra keys are stripped here rather than rejected; only the
    // final document is strict about its surface.
    let outline: Outline = deserialize_checked(map, &OUTLINE_KEYS, "outline")?;

    if outline.materials.len() < limits.min_materials as usize {
        violations.push(format!(
            "materials must have at least {} items",
            limits.min_materials
        ));
    }

    if outline.step_plan.len() < limits.min_steps as usize {
        violations.push(format!(
            "step_plan must have at least {} entries",
            limits.min_steps
        ));
    }

    if outline.safety_checks.len() < limits.min_safety_checks as usize {
        violations.push(format!(
            "safety_checks must have at least {} items",
            limits.min_safety_checks
        ));
    }

    if violations.is_empty() {
        Ok(outline)
    } else {
        Err(violations)
    }
}

/// Deserialize from a key-filtered copy of the map so stray keys on lenient
/// schemas don't trip serde.
fn deserialize_checked<T: serde::de::DeserializeOwned>(
    map: &Map<String, Value>,
    allowed: &[&str],
    what: &str,
) -> Result<T, Vec<String>> {
    let filtered: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| allowed.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    serde_json::from_value(Value::Object(filtered))
        .map_err(|err| vec![format!("{} failed to decode: {}", what, err)])
}

// ── Final activity validation ─────────────────────────────────────────

const FINAL_TOP_KEYS: [&str; 2] = ["schema_version", "activity"];
const ACTIVITY_KEYS: [&str; 13] = [
    "title",
    "age_group",
    "duration_minutes",
    "group_size",
    "theme",
    "goal",
    "learning_outcomes",
    "materials",
    "steps",
    "adaptations",
    "backup_plan",
    "teacher_tips",
    "safety_notes",
];

/// Validate a raw stage-2 response value into a typed `FinalActivity`.
///
/// The final document is strict: unexpected keys at the top level or inside
/// `activity` are structural violations, and `schema_version` must match
/// exactly.
pub fn validate_final_activity(
    value: &Value,
    limits: ValidationLimits,
) -> Result<FinalActivity, Vec<String>> {
    let mut violations = Vec::new();

    let Some(map) = as_object(value, "final activity", &mut violations) else {
        return Err(violations);
    };

    reject_unexpected_keys(map, &FINAL_TOP_KEYS, "final activity", &mut violations);

    match map.get("schema_version") {
        None => violations.push("schema_version is missing".to_string()),
        Some(Value::String(version)) if version == ACTIVITY_SCHEMA_VERSION => {}
        Some(_) => violations.push(format!(
            "schema_version must be \"{}\"",
            ACTIVITY_SCHEMA_VERSION
        )),
    }

    match map.get("activity") {
        None => violations.push("activity is missing".to_string()),
        Some(value) => {
            if let Some(activity) = as_object(value, "activity", &mut violations) {
                reject_unexpected_keys(activity, &ACTIVITY_KEYS, "activity", &mut violations);
                require_string(activity, "title", "activity.title", &mut violations);
                require_string(activity, "age_group", "activity.age_group", &mut violations);
                require_uint(
                    activity,
                    "duration_minutes",
                    "activity.duration_minutes",
                    &mut violations,
                );
                require_uint(activity, "group_size", "activity.group_size", &mut violations);
                require_string(activity, "theme", "activity.theme", &mut violations);
                require_string(activity, "goal", "activity.goal", &mut violations);
                require_string_array(
                    activity,
                    "learning_outcomes",
                    "activity.learning_outcomes",
                    &mut violations,
                );
                require_string_array(activity, "materials", "activity.materials", &mut violations);
                require_step_array(
                    activity,
                    "steps",
                    "instruction",
                    "activity.steps",
                    &mut violations,
                );
                require_adaptations(
                    activity,
                    "adaptations",
                    "activity.adaptations",
                    &mut violations,
                );
                require_string(
                    activity,
                    "backup_plan",
                    "activity.backup_plan",
                    &mut violations,
                );
                require_string_array(
                    activity,
                    "teacher_tips",
                    "activity.teacher_tips",
                    &mut violations,
                );
                require_string_array(
                    activity,
                    "safety_notes",
                    "activity.safety_notes",
                    &mut violations,
                );
            }
        }
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    let final_activity: FinalActivity =
        serde_json::from_value(value.clone()).map_err(|err| {
            vec![format!("final activity failed to decode: {}", err)]
        })?;

    let activity = &final_activity.activity;

    if activity.steps.is_empty() {
        violations.push("steps must not be empty".to_string());
    }

    if activity.materials.is_empty() {
        violations.push("materials must not be empty".to_string());
    }

    if activity.safety_notes.is_empty() {
        violations.push("safety_notes must not be empty".to_string());
    }

    let step_total: u64 = activity.steps.iter().map(|s| s.time_minutes as u64).sum();
    let duration = activity.duration_minutes as u64;
    if step_total.abs_diff(duration) > limits.time_tolerance_minutes as u64 {
        violations.push(format!(
            "sum of step time_minutes ({}) must be within ±{} minutes of duration ({})",
            step_total, limits.time_tolerance_minutes, duration
        ));
    }

    if violations.is_empty() {
        Ok(final_activity)
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_outline() -> Value {
        json!({
            "activity_concept": "Sink-or-float discovery table",
            "learning_outcomes": ["prediction", "observation"],
            "materials": ["water tub", "corks", "stones"],
            "step_plan": [
                {"step": 1, "label": "Gather around the tub", "time_minutes": 5},
                {"step": 2, "label": "Predict and test objects", "time_minutes": 25},
                {"step": 3, "label": "Sort results and discuss", "time_minutes": 15}
            ],
            "adaptations_plan": {
                "easier": ["pre-sorted objects"],
                "harder": ["record predictions on a chart"]
            },
            "safety_checks": ["mop spills immediately", "no small swallowable objects", "adult by the tub"]
        })
    }

    fn sample_final() -> Value {
        json!({
            "schema_version": "activity.v1",
            "activity": {
                "title": "Sink or Float?",
                "age_group": "3-4",
                "duration_minutes": 45,
                "group_size": 12,
                "theme": "STEM",
                "goal": "Explore buoyancy through prediction and testing",
                "learning_outcomes": ["prediction", "observation"],
                "materials": ["water tub", "corks", "stones"],
                "steps": [
                    {"step": 1, "instruction": "Gather the group around the tub", "time_minutes": 5},
                    {"step": 2, "instruction": "Let each child predict and test an object", "time_minutes": 25},
                    {"step": 3, "instruction": "Sort objects into float/sink trays", "time_minutes": 15}
                ],
                "adaptations": {
                    "easier": ["pre-sorted objects"],
                    "harder": ["record predictions on a chart"]
                },
                "backup_plan": "Use a picture-sorting game if water play is not possible",
                "teacher_tips": ["keep towels within reach"],
                "safety_notes": ["mop spills immediately", "no small objects", "adult by the tub"]
            }
        })
    }

    // =========================================
    // Outline: structural pass
    // =========================================

    #[test]
    fn test_valid_outline_passes() {
        let outline = validate_outline(&sample_outline(), ValidationLimits::default()).unwrap();
        assert_eq!(outline.activity_concept, "Sink-or-float discovery table");
        assert_eq!(outline.step_plan.len(), 3);
        assert_eq!(outline.step_plan[0].label, "Gather around the tub");
    }

    #[test]
    fn test_outline_not_an_object() {
        let errors = validate_outline(&json!([1, 2]), ValidationLimits::default()).unwrap_err();
        assert_eq!(errors, vec!["outline must be a JSON object"]);
    }

    #[test]
    fn test_outline_missing_key_named() {
        let mut value = sample_outline();
        value.as_object_mut().unwrap().remove("safety_checks");
        let errors = validate_outline(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(errors, vec!["safety_checks is missing"]);
    }

    #[test]
    fn test_outline_structural_failure_skips_domain_checks() {
        // materials has a wrong type AND would be too short; only the
        // structural violation may surface.
        let mut value = sample_outline();
        value["materials"] = json!("glue");
        let errors = validate_outline(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(errors, vec!["materials must be an array of strings"]);
    }

    #[test]
    fn test_outline_bad_step_entry() {
        let mut value = sample_outline();
        value["step_plan"][1] = json!({"step": "two", "label": 7});
        let errors = validate_outline(&value, ValidationLimits::default()).unwrap_err();
        assert!(errors.contains(&"step_plan[1].step must be a non-negative integer".to_string()));
        assert!(errors.contains(&"step_plan[1].label must be a string".to_string()));
        assert!(errors.contains(&"step_plan[1].time_minutes is missing".to_string()));
    }

    #[test]
    fn test_outline_negative_minutes_rejected() {
        let mut value = sample_outline();
        value["step_plan"][0]["time_minutes"] = json!(-5);
        let errors = validate_outline(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(
            errors,
            vec!["step_plan[0].time_minutes must be a non-negative integer"]
        );
    }

    #[test]
    fn test_outline_tolerates_extra_keys() {
        let mut value = sample_outline();
        value["notes"] = json!("model chatter");
        assert!(validate_outline(&value, ValidationLimits::default()).is_ok());
    }

    // =========================================
    // Outline: domain pass
    // =========================================

    #[test]
    fn test_outline_minimums_collected_together() {
        let mut value = sample_outline();
        value["materials"] = json!(["water tub"]);
        value["step_plan"] = json!([{"step": 1, "label": "only step", "time_minutes": 45}]);
        value["safety_checks"] = json!(["one check"]);
        let errors = validate_outline(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&"materials must have at least 3 items".to_string()));
        assert!(errors.contains(&"step_plan must have at least 3 entries".to_string()));
        assert!(errors.contains(&"safety_checks must have at least 3 items".to_string()));
    }

    #[test]
    fn test_outline_limits_from_template_raise_floor() {
        let template = TemplateConfig {
            min_steps: Some(5),
            min_materials: Some(2),
            ..Default::default()
        };
        let limits = ValidationLimits::from_template(&template);
        assert_eq!(limits.min_steps, 5);
        // Configured floors never drop below 3
        assert_eq!(limits.min_materials, 3);

        let errors = validate_outline(&sample_outline(), limits).unwrap_err();
        assert_eq!(errors, vec!["step_plan must have at least 5 entries"]);
    }

    #[test]
    fn test_outline_validation_is_idempotent() {
        let value = sample_outline();
        let first = validate_outline(&value, ValidationLimits::default()).unwrap();
        let second = validate_outline(&value, ValidationLimits::default()).unwrap();
        assert_eq!(first, second);
    }

    // =========================================
    // Final activity: structural pass
    // =========================================

    #[test]
    fn test_valid_final_passes() {
        let doc = validate_final_activity(&sample_final(), ValidationLimits::default()).unwrap();
        assert_eq!(doc.schema_version, ACTIVITY_SCHEMA_VERSION);
        assert_eq!(doc.activity.duration_minutes, 45);
        assert_eq!(doc.activity.group_size, 12);
        assert_eq!(doc.activity.theme, "STEM");
    }

    #[test]
    fn test_final_rejects_unexpected_top_level_key() {
        let mut value = sample_final();
        value["commentary"] = json!("so fun!");
        let errors = validate_final_activity(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(
            errors,
            vec!["final activity contains unexpected key `commentary`"]
        );
    }

    #[test]
    fn test_final_rejects_unexpected_activity_key() {
        let mut value = sample_final();
        value["activity"]["difficulty"] = json!("hard");
        let errors = validate_final_activity(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(errors, vec!["activity contains unexpected key `difficulty`"]);
    }

    #[test]
    fn test_final_wrong_schema_version() {
        let mut value = sample_final();
        value["schema_version"] = json!("activity.v2");
        let errors = validate_final_activity(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(errors, vec!["schema_version must be \"activity.v1\""]);
    }

    #[test]
    fn test_final_teacher_tips_must_be_array() {
        let mut value = sample_final();
        value["activity"]["teacher_tips"] = json!("just one tip");
        let errors = validate_final_activity(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(
            errors,
            vec!["activity.teacher_tips must be an array of strings"]
        );
    }

    #[test]
    fn test_final_multiple_structural_violations_collected() {
        let mut value = sample_final();
        let activity = value["activity"].as_object_mut().unwrap();
        activity.remove("goal");
        activity.remove("backup_plan");
        let errors = validate_final_activity(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&"activity.goal is missing".to_string()));
        assert!(errors.contains(&"activity.backup_plan is missing".to_string()));
    }

    // =========================================
    // Final activity: domain pass
    // =========================================

    #[test]
    fn test_final_duration_tolerance() {
        // 5 + 25 + 15 = 45; duration 56 puts the drift at 11 > 10.
        let mut value = sample_final();
        value["activity"]["duration_minutes"] = json!(56);
        let errors = validate_final_activity(&value, ValidationLimits::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("within ±10 minutes"));

        // Exactly at the tolerance edge is accepted.
        let mut value = sample_final();
        value["activity"]["duration_minutes"] = json!(55);
        assert!(validate_final_activity(&value, ValidationLimits::default()).is_ok());
    }

    #[test]
    fn test_final_empty_lists_rejected_together() {
        let mut value = sample_final();
        value["activity"]["steps"] = json!([]);
        value["activity"]["materials"] = json!([]);
        value["activity"]["safety_notes"] = json!([]);
        value["activity"]["duration_minutes"] = json!(0);
        let errors = validate_final_activity(&value, ValidationLimits::default()).unwrap_err();
        assert!(errors.contains(&"steps must not be empty".to_string()));
        assert!(errors.contains(&"materials must not be empty".to_string()));
        assert!(errors.contains(&"safety_notes must not be empty".to_string()));
    }

    #[test]
    fn test_final_validation_is_idempotent() {
        let value = sample_final();
        let first = validate_final_activity(&value, ValidationLimits::default()).unwrap();
        let second = validate_final_activity(&value, ValidationLimits::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_final_round_trips_through_serde() {
        let doc = validate_final_activity(&sample_final(), ValidationLimits::default()).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert!(validate_final_activity(&value, ValidationLimits::default()).is_ok());
    }
}
