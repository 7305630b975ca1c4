//! Criterion scores, weighted synthesis, and the decision table.
//!
//! Every function here is pure: the same signals always give the same score,
//! verdict, and confidence.
use super::trace::TrustVerdict;
use crate::inference::validators::{DocRatings, Sentiment};
use crate::model::{RecordMetadata, RepoStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DOCUMENTATION_WEIGHT: f64 = 0.30;
pub const ADOPTION_WEIGHT: f64 = 0.25;
pub const MAINTENANCE_WEIGHT: f64 = 0.25;
pub const API_DESIGN_WEIGHT: f64 = 0.20;

/// Share of the model's documentation rating folded into the heuristic.
const DOC_RATING_SHARE: f64 = 0.4;

/// Substrings marking a degraded or failed reasoning step.
pub const ERROR_MARKERS: [&str; 4] = ["failed", "error", "timeout", "unavailable"];

/// Steps required before a verdict other than DEFER is possible.
pub const MIN_REASONING_STEPS: usize = 3;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Per-criterion scores, each 0-10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriteriaScores {
    pub documentation: f64,
    pub adoption: f64,
    pub maintenance: f64,
    pub api_design: f64,
}

impl CriteriaScores {
    /// Weighted sum, capped at 10.
    pub fn weighted_total(&self) -> f64 {
        let total = self.documentation * DOCUMENTATION_WEIGHT
            + self.adoption * ADOPTION_WEIGHT
            + self.maintenance * MAINTENANCE_WEIGHT
            + self.api_design * API_DESIGN_WEIGHT;
        total.min(10.0)
    }

    pub fn values(&self) -> [f64; 4] {
        [
            self.documentation,
            self.adoption,
            self.maintenance,
            self.api_design,
        ]
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("documentation".to_string(), self.documentation),
            ("adoption".to_string(), self.adoption),
            ("maintenance".to_string(), self.maintenance),
            ("api_design".to_string(), self.api_design),
        ])
    }
}

/// Everything the criteria read.
#[derive(Debug, Clone, Copy)]
pub struct Signals<'a> {
    pub metadata: &'a RecordMetadata,
    pub repo_stats: Option<&'a RepoStats>,
    pub doc_ratings: DocRatings,
    pub sentiment: Sentiment,
    pub now_epoch_ms: u64,
}

pub fn score_criteria(signals: &Signals<'_>) -> CriteriaScores {
    CriteriaScores {
        documentation: documentation_score(signals.metadata, signals.doc_ratings),
        adoption: adoption_score(signals.metadata, signals.repo_stats, signals.sentiment),
        maintenance: maintenance_score(
            signals.metadata,
            signals.repo_stats,
            signals.now_epoch_ms,
        ),
        api_design: api_design_score(signals.metadata),
    }
}

pub fn documentation_score(metadata: &RecordMetadata, ratings: DocRatings) -> f64 {
    let mut score = 0.0;
    let readme_len = metadata.readme.chars().count();
    if readme_len > 1000 {
        score += 3.0;
    } else if readme_len > 500 {
        score += 2.0;
    } else if readme_len > 100 {
        score += 1.0;
    }
    let snippets = metadata.code_snippets.len();
    if snippets > 3 {
        score += 2.0;
    } else if snippets > 0 {
        score += 1.0;
    }
    if !metadata.description.trim().is_empty() {
        score += 1.0;
    }
    f64::min(score + DOC_RATING_SHARE * ratings.mean(), 10.0)
}

pub fn adoption_score(
    metadata: &RecordMetadata,
    repo_stats: Option<&RepoStats>,
    sentiment: Sentiment,
) -> f64 {
    let mut score: f64 = match metadata.downloads {
        d if d > 100_000 => 4.0,
        d if d > 10_000 => 3.0,
        d if d > 1_000 => 2.0,
        d if d > 100 => 1.0,
        _ => 0.0,
    };
    let stars = repo_stats
        .map(|stats| stats.stars)
        .unwrap_or(0)
        .max(metadata.github_stars);
    score += match stars {
        s if s > 1000 => 3.0,
        s if s > 100 => 2.0,
        s if s > 10 => 1.0,
        _ => 0.0,
    };
    score += match repo_stats.map(|stats| stats.forks).unwrap_or(0) {
        f if f > 50 => 2.0,
        f if f > 5 => 1.0,
        _ => 0.0,
    };
    score += match sentiment {
        Sentiment::Positive => 1.0,
        Sentiment::Neutral => 0.0,
        Sentiment::Negative => -1.0,
    };
    score.clamp(0.0, 10.0)
}

pub fn maintenance_score(
    metadata: &RecordMetadata,
    repo_stats: Option<&RepoStats>,
    now_epoch_ms: u64,
) -> f64 {
    let mut score: f64 = 5.0;
    if !metadata.repository.trim().is_empty() {
        score += 2.0;
    }
    if let Some(updated) = repo_stats.and_then(|stats| stats.updated_at_epoch_ms) {
        let age_days = now_epoch_ms.saturating_sub(updated) / DAY_MS;
        if age_days < 30 {
            score += 2.0;
        } else if age_days < 90 {
            score += 1.0;
        } else if age_days > 365 {
            score -= 2.0;
        }
    }
    let deps = metadata.dependencies.len();
    if deps <= 20 {
        score += 1.0;
    } else if deps > 50 {
        score -= 1.0;
    }
    score.clamp(0.0, 10.0)
}

pub fn api_design_score(metadata: &RecordMetadata) -> f64 {
    let mut score: f64 = 0.0;
    if !metadata.categories.is_empty() {
        score += 2.0;
    }
    match metadata.keywords.len() {
        k if k >= 3 => score += 2.0,
        k if k > 0 => score += 1.0,
        _ => {}
    }
    match metadata.features.len() {
        1..=10 => score += 3.0,
        f if f > 10 => score += 1.0,
        _ => {}
    }
    let description_len = metadata.description.trim().chars().count();
    if description_len > 50 {
        score += 2.0;
    } else if description_len > 10 {
        score += 1.0;
    }
    score.min(10.0)
}

/// Fixed decision table, first match wins.
pub fn decide(
    reasoning_steps: &[String],
    score: f64,
    criteria: &[f64],
) -> (TrustVerdict, &'static str) {
    if reasoning_steps.len() < MIN_REASONING_STEPS {
        return (TrustVerdict::Defer, "analysis incomplete");
    }
    let has_error_marker = reasoning_steps.iter().any(|step| {
        let step = step.to_lowercase();
        ERROR_MARKERS.iter().any(|marker| step.contains(marker))
    });
    if has_error_marker {
        return (
            TrustVerdict::Flag,
            "error indicators present in reasoning steps",
        );
    }
    if score >= 8.0 {
        return (TrustVerdict::Allow, "high quality score");
    }
    if score >= 6.0 {
        if criteria.iter().all(|criterion| *criterion >= 3.0) {
            return (TrustVerdict::Allow, "good quality score, no weak criterion");
        }
        return (TrustVerdict::Flag, "good quality score with a weak criterion");
    }
    if score >= 4.0 {
        return (TrustVerdict::Flag, "moderate quality score");
    }
    (TrustVerdict::Deny, "poor quality score")
}

/// Confidence contribution of the verdict; `None` is a chain error.
pub fn verdict_weight(verdict: Option<TrustVerdict>) -> f64 {
    match verdict {
        Some(TrustVerdict::Allow) => 0.20,
        Some(TrustVerdict::Flag) => 0.10,
        Some(TrustVerdict::Defer) => 0.05,
        Some(TrustVerdict::Deny) => 0.02,
        None => 0.0,
    }
}

/// Blended confidence in [0, 1].
pub fn confidence(
    source_count: usize,
    step_count: usize,
    score: f64,
    verdict: Option<TrustVerdict>,
) -> f64 {
    let sources = f64::min(1.0, source_count as f64 / 3.0);
    let steps = f64::min(1.0, step_count as f64 / 8.0);
    let quality = score.clamp(0.0, 10.0) / 10.0;
    let blended = 0.25 * sources + 0.25 * steps + 0.30 * quality + verdict_weight(verdict);
    blended.clamp(0.0, 1.0)
}

/// Human-facing recommendation tier for a score.
pub fn suggestion(score: f64) -> String {
    if score >= 8.0 {
        format!(
            "HIGH CONFIDENCE: Crate shows excellent quality (score: {score:.1}/10). Recommended for production use."
        )
    } else if score >= 6.0 {
        format!(
            "MEDIUM CONFIDENCE: Crate shows good quality (score: {score:.1}/10). Suitable for most use cases with review."
        )
    } else if score >= 4.0 {
        format!(
            "LOW CONFIDENCE: Crate shows moderate quality (score: {score:.1}/10). Use with caution and thorough testing."
        )
    } else {
        format!(
            "NOT RECOMMENDED: Crate shows poor quality (score: {score:.1}/10). Consider alternatives."
        )
    }
}

#[cfg(test)]
#[path = "scoring_tests.rs"]
mod tests;
