//! Model-generated enrichment of a record: readme summary, feature
//! explanation, use-case classification, and factual/counterfactual pairs.
//!
//! Every field degrades independently. A field whose output never validates
//! keeps the last text obtained, or a fixed placeholder when that was empty.
use crate::inference::prompt::{smart_truncate, truncate_content};
use crate::inference::validators::{self, min_length};
use crate::inference::{InferenceCall, InferenceTask, Prompt, ValidatedInference};
use crate::model::{EnrichedRecord, RecordMetadata, UseCase};
use std::sync::Arc;

pub const NO_FEATURES: &str = "No features documented for this crate.";
pub const FEATURES_UNAVAILABLE: &str = "Feature summary not available.";
pub const FACTUAL_PAIRS_FAILED: &str = "Factual pairs generation failed.";

const README_SUMMARY_TOKENS: usize = 2000;
const README_SUMMARY_MIN_CHARS: usize = 50;
const MAX_FEATURES_LISTED: usize = 8;
const CLASSIFY_DESCRIPTION_TOKENS: usize = 480;
const CLASSIFY_SUMMARY_TOKENS: usize = 1440;
const PAIR_CONTEXT_TOKENS: usize = 300;

pub struct Enricher {
    inference: Arc<ValidatedInference>,
}

impl Enricher {
    pub fn new(inference: Arc<ValidatedInference>) -> Self {
        Self { inference }
    }

    pub fn enrich(&self, metadata: RecordMetadata) -> EnrichedRecord {
        let readme_summary = self.summarize_readme(&metadata);
        let feature_summary = self.summarize_features(&metadata);
        let use_case = self.classify(&metadata, readme_summary.as_deref());
        let factual_counterfactual = self.factual_pairs(&metadata, readme_summary.as_deref());
        let score = popularity_score(&metadata);
        tracing::debug!(
            record = metadata.name.as_str(),
            %use_case,
            score,
            "record enriched"
        );
        EnrichedRecord {
            readme_summary,
            feature_summary: Some(feature_summary),
            use_case,
            score: Some(score),
            factual_counterfactual: Some(factual_counterfactual),
            ..EnrichedRecord::from_metadata(metadata)
        }
    }

    fn summarize_readme(&self, metadata: &RecordMetadata) -> Option<String> {
        if metadata.readme.trim().is_empty() {
            return None;
        }
        let prompt = Prompt::new(
            "Extract key features from README.",
            format!(
                "Summarize key aspects of this Rust crate from its README:\n{}",
                smart_truncate(&metadata.readme, README_SUMMARY_TOKENS)
            ),
        );
        let validator = min_length(README_SUMMARY_MIN_CHARS);
        self.inference
            .invoke_with_retry(
                call(InferenceTask::ReadmeSummary, metadata),
                &prompt,
                &validator,
                0.3,
                300,
            )
            .text
            .filter(|text| !text.trim().is_empty())
    }

    fn summarize_features(&self, metadata: &RecordMetadata) -> String {
        if metadata.features.is_empty() {
            return NO_FEATURES.to_string();
        }
        let outcome = self.inference.invoke_with_retry(
            call(InferenceTask::FeatureSummary, metadata),
            &feature_prompt(metadata),
            &|text: &str| !text.trim().is_empty(),
            0.2,
            350,
        );
        outcome
            .text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| FEATURES_UNAVAILABLE.to_string())
    }

    fn classify(&self, metadata: &RecordMetadata, readme_summary: Option<&str>) -> UseCase {
        let outcome = self.inference.invoke_with_retry(
            call(InferenceTask::Classification, metadata),
            &classification_prompt(metadata, readme_summary),
            &validators::classification,
            0.2,
            50,
        );
        outcome
            .validated_text()
            .and_then(UseCase::from_label)
            .unwrap_or_default()
    }

    fn factual_pairs(&self, metadata: &RecordMetadata, readme_summary: Option<&str>) -> String {
        let outcome = self.inference.invoke_with_retry(
            call(InferenceTask::FactualPairs, metadata),
            &factual_pairs_prompt(metadata, readme_summary),
            &validators::factual_pairs,
            0.7,
            800,
        );
        if let Some(text) = outcome.validated_text() {
            return validators::format_factual_pairs(&validators::extract_factual_pairs(text));
        }
        tracing::warn!(
            record = metadata.name.as_str(),
            attempts = outcome.attempts,
            "factual pairs did not validate"
        );
        outcome
            .text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| FACTUAL_PAIRS_FAILED.to_string())
    }
}

fn call(task: InferenceTask, metadata: &RecordMetadata) -> InferenceCall<'_> {
    InferenceCall {
        task,
        subject: &metadata.name,
    }
}

/// `- name (dependencies: a, b)` for the first few feature flags.
pub fn format_features(metadata: &RecordMetadata) -> String {
    metadata
        .features
        .iter()
        .take(MAX_FEATURES_LISTED)
        .map(|(name, deps)| {
            let deps = if deps.is_empty() {
                "none".to_string()
            } else {
                deps.join(", ")
            };
            format!("- {name} (dependencies: {deps})\n")
        })
        .collect()
}

pub fn feature_prompt(metadata: &RecordMetadata) -> Prompt {
    Prompt::new(
        "You are a Rust programming expert analyzing crate features.",
        format!(
            "For the Rust crate `{}`, explain these features and what functionality they provide:\n\n\
{}\n\
Provide a concise explanation of each feature's purpose and when a developer would enable it.",
            metadata.name,
            format_features(metadata)
        ),
    )
}

/// Few-shot classification prompt shared with the ecosystem analysis.
pub fn classification_prompt(metadata: &RecordMetadata, readme_summary: Option<&str>) -> Prompt {
    let keywords = if metadata.keywords.is_empty() {
        "None".to_string()
    } else {
        metadata
            .keywords
            .iter()
            .take(10)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let key_deps: Vec<&str> = metadata
        .dependencies
        .iter()
        .take(5)
        .filter(|dep| dep.kind == "normal" && !dep.crate_id.is_empty())
        .map(|dep| dep.crate_id.as_str())
        .collect();
    let key_deps = if key_deps.is_empty() {
        "None".to_string()
    } else {
        key_deps.join(", ")
    };
    let categories: Vec<&str> = UseCase::ALL.iter().map(UseCase::as_str).collect();
    Prompt::new(
        "You are a Rust expert classifying crates into the most appropriate category.",
        format!(
            "# Crate to Classify\n\
Crate: `{}`\n\
Description: {}\n\
Keywords: {}\n\
README Summary: {}\n\
Key Dependencies: {}\n\n\
Allowed categories (pick only one): [{}]\n\
Answer with the category name only.",
            metadata.name,
            truncate_content(&metadata.description, CLASSIFY_DESCRIPTION_TOKENS),
            keywords,
            smart_truncate(readme_summary.unwrap_or_default(), CLASSIFY_SUMMARY_TOKENS),
            key_deps,
            categories.join(", ")
        ),
    )
    .with_example(
        "Crate: `tokio`\n\
Description: An asynchronous runtime for the Rust programming language\n\
Keywords: async, runtime, futures\n\
Key Dependencies: mio, bytes, parking_lot\n\
Category: Networking",
    )
    .with_example(
        "Crate: `serde`\n\
Description: A generic serialization/deserialization framework\n\
Keywords: serde, serialization\n\
Key Dependencies: serde_derive\n\
Category: Serialization",
    )
}

pub fn factual_pairs_prompt(metadata: &RecordMetadata, readme_summary: Option<&str>) -> Prompt {
    let features: Vec<&str> = metadata
        .features
        .keys()
        .take(5)
        .map(String::as_str)
        .collect();
    Prompt::new(
        "Create exactly 5 factual/counterfactual pairs for the Rust crate. \
Factual statements must be true. Counterfactuals should be plausible but incorrect; \
make them subtle and convincing rather than simple negations.",
        format!(
            "Crate: {}\n\
Description: {}\n\
Repo: {}\n\
README Summary: {}\n\
Key Features: {}\n\n\
Format each pair as:\n\
✅ Factual: [true statement about the crate]\n\
❌ Counterfactual: [plausible but false statement]\n\n\
Create exactly 5 factual/counterfactual pairs.",
            metadata.name,
            truncate_content(&metadata.description, PAIR_CONTEXT_TOKENS),
            metadata.repository,
            truncate_content(readme_summary.unwrap_or_default(), PAIR_CONTEXT_TOKENS),
            features.join(", ")
        ),
    )
}

/// Popularity score: downloads/1000 + stars*10 + readme length/500,
/// rounded to two decimals.
pub fn popularity_score(metadata: &RecordMetadata) -> f64 {
    let readme = truncate_content(&metadata.readme, 1000);
    let score = metadata.downloads as f64 / 1000.0
        + metadata.github_stars as f64 * 10.0
        + readme.chars().count() as f64 / 500.0;
    (score * 100.0).round() / 100.0
}
