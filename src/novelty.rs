//! Similarity gate between a candidate activity and recently generated ones.
//!
//! Scores `title + " " + concept` against each recent concept with Jaccard
//! similarity over lowercase word sets. Deterministic and purely local; the
//! orchestrator decides what to do with a rejection.

/// Maximum similarity tolerated before a candidate is rejected.
pub const DEFAULT_NOVELTY_THRESHOLD: f64 = 0.6;

/// Outcome of a novelty check.
#[derive(Debug, Clone, PartialEq)]
pub struct NoveltyReport {
    /// True iff the highest similarity stayed below the threshold.
    pub approved: bool,
    /// Highest Jaccard score across all recent concepts (0 when none exist).
    pub score: f64,
    /// The recent concept that produced the highest score, first seen wins ties.
    pub most_similar: Option<String>,
}

/// Compare a candidate title + concept against recent concepts.
///
/// An empty `recent_concepts` list approves vacuously with score 0.
/// Rejection happens at `score >= threshold`.
pub fn check_novelty(
    title: &str,
    concept: &str,
    recent_concepts: &[String],
    threshold: f64,
) -> NoveltyReport {
    if recent_concepts.is_empty() {
        return NoveltyReport {
            approved: true,
            score: 0.0,
            most_similar: None,
        };
    }

    let candidate = tokenize(&format!("{} {}", title, concept));

    let mut max_score = 0.0;
    let mut most_similar = None;

    for recent in recent_concepts {
        let score = jaccard(&candidate, &tokenize(recent));
        if score > max_score {
            max_score = score;
            most_similar = Some(recent.clone());
        }
    }

    NoveltyReport {
        approved: max_score < threshold,
        score: max_score,
        most_similar,
    }
}

/// Lowercase word set; non-alphanumeric characters act as separators.
fn tokenize(input: &str) -> std::collections::HashSet<String> {
    input
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

fn jaccard(
    a: &std::collections::HashSet<String>,
    b: &std::collections::HashSet<String>,
) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
