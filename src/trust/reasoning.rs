//! Sub-analyses of the reasoning stage.
//!
//! Each analysis catches its own failures and degrades to a documented
//! neutral value. The degraded flag travels with the value so the reasoning
//! text can say so and the decision table can flag the record.
use crate::enrich::classification_prompt;
use crate::inference::prompt::{smart_truncate, truncate_content};
use crate::inference::validators::{self, DocRatings, Sentiment};
use crate::inference::{InferenceCall, InferenceTask, Prompt, ValidatedInference};
use crate::model::{RecordMetadata, RepoStats, UseCase};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A sub-analysis result plus whether it is a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assessed<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> Assessed<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }
}

/// Release maturity derived from version and adoption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Maturity {
    Experimental,
    Stable,
    Mature,
    #[default]
    Unknown,
}

impl Maturity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Maturity::Experimental => "experimental",
            Maturity::Stable => "stable",
            Maturity::Mature => "mature",
            Maturity::Unknown => "unknown",
        }
    }

    /// Pre-1.0 crates are experimental until widely downloaded; 1.x crates
    /// are mature once very widely downloaded.
    pub fn from_release(version: &str, downloads: u64) -> Maturity {
        let Some(major) = version
            .trim()
            .trim_start_matches('v')
            .split('.')
            .next()
            .and_then(|major| major.parse::<u64>().ok())
        else {
            return Maturity::Unknown;
        };
        match (major, downloads) {
            (0, d) if d >= 1_000_000 => Maturity::Stable,
            (0, _) => Maturity::Experimental,
            (_, d) if d >= 10_000_000 => Maturity::Mature,
            _ => Maturity::Stable,
        }
    }
}

impl fmt::Display for Maturity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ecosystem {
    pub category: UseCase,
    pub maturity: Maturity,
}

/// Outcome of the whole reasoning stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Reasoning {
    pub steps: Vec<String>,
    pub metadata_fields: Assessed<usize>,
    pub doc_ratings: Assessed<DocRatings>,
    pub sentiment: Assessed<Sentiment>,
    pub ecosystem: Assessed<Ecosystem>,
}

impl Reasoning {
    pub fn degraded_steps(&self) -> Vec<&'static str> {
        [
            ("metadata", self.metadata_fields.degraded),
            ("documentation", self.doc_ratings.degraded),
            ("sentiment", self.sentiment.degraded),
            ("ecosystem", self.ecosystem.degraded),
        ]
        .into_iter()
        .filter_map(|(name, degraded)| degraded.then_some(name))
        .collect()
    }
}

/// What the reasoning stage reads for one record.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningInput<'a> {
    pub metadata: &'a RecordMetadata,
    pub repo_stats: Option<&'a RepoStats>,
    /// Category already assigned by enrichment; skips the model call.
    pub known_use_case: Option<UseCase>,
}

pub fn run_reasoning(inference: &ValidatedInference, input: &ReasoningInput<'_>) -> Reasoning {
    let mut steps = Vec::with_capacity(4);

    let metadata_fields = extract_metadata(input.metadata);
    steps.push(if metadata_fields.degraded {
        format!(
            "Metadata extraction failed: required fields missing, using fallback values ({} fields)",
            metadata_fields.value
        )
    } else {
        format!("Basic metadata extracted: {} fields", metadata_fields.value)
    });

    let doc_ratings = analyze_documentation(inference, input.metadata);
    steps.push(if doc_ratings.degraded {
        format!(
            "Documentation analysis failed, using fallback values: quality={:.1}",
            doc_ratings.value.mean()
        )
    } else {
        format!("Documentation analyzed: quality={:.1}", doc_ratings.value.mean())
    });

    let sentiment = analyze_sentiment(inference, input.metadata, input.repo_stats);
    steps.push(if sentiment.degraded {
        format!(
            "Community sentiment analysis failed, using fallback values: {}",
            sentiment.value.as_str()
        )
    } else {
        format!("Community sentiment: {}", sentiment.value.as_str())
    });

    let ecosystem = analyze_ecosystem(inference, input.metadata, input.known_use_case);
    steps.push(if ecosystem.degraded {
        format!(
            "Ecosystem analysis failed, using fallback values: {} (maturity {})",
            ecosystem.value.category, ecosystem.value.maturity
        )
    } else {
        format!(
            "Ecosystem position: {} ({})",
            ecosystem.value.category, ecosystem.value.maturity
        )
    });

    Reasoning {
        steps,
        metadata_fields,
        doc_ratings,
        sentiment,
        ecosystem,
    }
}

/// Count populated descriptor fields; name and version are required.
pub fn extract_metadata(metadata: &RecordMetadata) -> Assessed<usize> {
    let populated = [
        !metadata.name.is_empty(),
        !metadata.version.is_empty(),
        !metadata.description.is_empty(),
        !metadata.repository.is_empty(),
        !metadata.keywords.is_empty(),
        !metadata.categories.is_empty(),
        !metadata.readme.is_empty(),
        metadata.downloads > 0,
        !metadata.dependencies.is_empty(),
        !metadata.features.is_empty(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();
    if metadata.name.is_empty() || metadata.version.is_empty() {
        return Assessed::fallback(populated);
    }
    Assessed::ok(populated)
}

pub fn documentation_prompt(metadata: &RecordMetadata) -> Prompt {
    let readme = if metadata.readme.trim().is_empty() {
        "(no README)".to_string()
    } else {
        smart_truncate(&metadata.readme, 1500)
    };
    Prompt::new(
        "You review Rust crate documentation. Answer with a single JSON object.",
        format!(
            "Rate the documentation of the Rust crate '{}' from 1 to 10.\n\
Return JSON: {{\"completeness\": <1-10>, \"clarity\": <1-10>, \"examples\": <1-10>}}\n\n\
Description: {}\n\nREADME:\n{}",
            metadata.name, metadata.description, readme
        ),
    )
}

pub fn analyze_documentation(
    inference: &ValidatedInference,
    metadata: &RecordMetadata,
) -> Assessed<DocRatings> {
    let outcome = inference.invoke_with_retry(
        InferenceCall {
            task: InferenceTask::DocQuality,
            subject: &metadata.name,
        },
        &documentation_prompt(metadata),
        &validators::doc_ratings,
        0.2,
        150,
    );
    match outcome.validated_text().and_then(DocRatings::parse) {
        Some(ratings) => Assessed::ok(ratings),
        None => {
            tracing::warn!(record = metadata.name.as_str(), "documentation analysis degraded");
            Assessed::fallback(DocRatings::FALLBACK)
        }
    }
}

pub fn sentiment_prompt(metadata: &RecordMetadata, repo_stats: Option<&RepoStats>) -> Prompt {
    let stars = repo_stats
        .map(|stats| stats.stars)
        .unwrap_or(0)
        .max(metadata.github_stars);
    let open_issues = repo_stats.map(|stats| stats.open_issues).unwrap_or(0);
    Prompt::new(
        "You judge how the Rust community regards a crate. Answer with one word.",
        format!(
            "Crate: {} {}\nDescription: {}\nDownloads: {}\nGitHub stars: {}\nOpen issues: {}\n\n\
README excerpt:\n{}\n\n\
Is community sentiment toward this crate positive, neutral, or negative?",
            metadata.name,
            metadata.version,
            metadata.description,
            metadata.downloads,
            stars,
            open_issues,
            truncate_content(&metadata.readme, 400)
        ),
    )
}

pub fn analyze_sentiment(
    inference: &ValidatedInference,
    metadata: &RecordMetadata,
    repo_stats: Option<&RepoStats>,
) -> Assessed<Sentiment> {
    let outcome = inference.invoke_with_retry(
        InferenceCall {
            task: InferenceTask::Sentiment,
            subject: &metadata.name,
        },
        &sentiment_prompt(metadata, repo_stats),
        &validators::sentiment,
        0.1,
        10,
    );
    match outcome.validated_text().and_then(Sentiment::parse) {
        Some(sentiment) => Assessed::ok(sentiment),
        None => {
            tracing::warn!(record = metadata.name.as_str(), "sentiment analysis degraded");
            Assessed::fallback(Sentiment::Neutral)
        }
    }
}

pub fn analyze_ecosystem(
    inference: &ValidatedInference,
    metadata: &RecordMetadata,
    known_use_case: Option<UseCase>,
) -> Assessed<Ecosystem> {
    let maturity = Maturity::from_release(&metadata.version, metadata.downloads);
    if let Some(category) = known_use_case.filter(|case| *case != UseCase::Unknown) {
        return Assessed::ok(Ecosystem { category, maturity });
    }
    let outcome = inference.invoke_with_retry(
        InferenceCall {
            task: InferenceTask::Ecosystem,
            subject: &metadata.name,
        },
        &classification_prompt(metadata, None),
        &validators::classification,
        0.2,
        50,
    );
    // A validated "Unknown" is an answer, not a failure.
    match outcome.validated_text().and_then(UseCase::from_label) {
        Some(category) => Assessed::ok(Ecosystem { category, maturity }),
        None => {
            tracing::warn!(record = metadata.name.as_str(), "ecosystem analysis degraded");
            Assessed::fallback(Ecosystem {
                category: UseCase::Unknown,
                maturity: Maturity::Unknown,
            })
        }
    }
}
