//! Record types flowing through enrichment and trust decisions.
//!
//! These mirror the JSONL checkpoint lines so a resumed run reads back exactly
//! what an earlier run wrote.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dependency edge as reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub crate_id: String,
    #[serde(default = "default_dependency_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req: Option<String>,
}

fn default_dependency_kind() -> String {
    "normal".to_string()
}

/// Summary of one scraped documentation source attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSummary {
    pub title: String,
    pub quality_score: f64,
    #[serde(default)]
    pub structured_data: serde_json::Value,
    pub content_length: usize,
}

/// Immutable package descriptor produced by the metadata client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub readme: String,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub github_stars: u64,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default)]
    pub features: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub code_snippets: Vec<String>,
    #[serde(default)]
    pub readme_sections: BTreeMap<String, String>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enhanced_scraping: BTreeMap<String, ScrapeSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enhanced_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enhanced_dependencies: Vec<String>,
}

fn default_source() -> String {
    "crates.io".to_string()
}

/// Repository statistics from the source-hosting client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStats {
    #[serde(default)]
    pub stars: u64,
    #[serde(default)]
    pub forks: u64,
    #[serde(default)]
    pub open_issues: u64,
    #[serde(default)]
    pub watchers: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Last update of the repository, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_epoch_ms: Option<u64>,
}

/// One scraped documentation source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub structured_data: serde_json::Value,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Closed set of use-case categories a record is classified into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UseCase {
    #[serde(rename = "AI")]
    Ai,
    Database,
    #[serde(rename = "Web Framework")]
    WebFramework,
    Networking,
    Serialization,
    Utilities,
    DevTools,
    #[serde(rename = "ML")]
    Ml,
    Cryptography,
    #[default]
    Unknown,
}

impl UseCase {
    pub const ALL: [UseCase; 10] = [
        UseCase::Ai,
        UseCase::Database,
        UseCase::WebFramework,
        UseCase::Networking,
        UseCase::Serialization,
        UseCase::Utilities,
        UseCase::DevTools,
        UseCase::Ml,
        UseCase::Cryptography,
        UseCase::Unknown,
    ];

    /// Return the label used in prompts and JSON artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::Ai => "AI",
            UseCase::Database => "Database",
            UseCase::WebFramework => "Web Framework",
            UseCase::Networking => "Networking",
            UseCase::Serialization => "Serialization",
            UseCase::Utilities => "Utilities",
            UseCase::DevTools => "DevTools",
            UseCase::Ml => "ML",
            UseCase::Cryptography => "Cryptography",
            UseCase::Unknown => "Unknown",
        }
    }

    /// Exact, case-insensitive label match.
    pub fn from_label(label: &str) -> Option<UseCase> {
        let label = label.trim();
        UseCase::ALL
            .into_iter()
            .find(|case| case.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust outcome attached to an enriched record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSummary {
    pub execution_id: String,
    pub verdict: crate::trust::TrustVerdict,
    pub confidence: f64,
    pub quality_score: f64,
    pub criteria: BTreeMap<String, f64>,
    pub canon_sources: Vec<String>,
    pub reasoning_trace: Vec<String>,
    pub suggestion: String,
}

/// A record plus everything derived for it. Immutable once checkpointed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// Work-list name the record was requested under. The registry may
    /// answer with a different spelling in `metadata.name`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,
    #[serde(flatten)]
    pub metadata: RecordMetadata,
    #[serde(default)]
    pub readme_summary: Option<String>,
    #[serde(default)]
    pub feature_summary: Option<String>,
    #[serde(default)]
    pub use_case: UseCase,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub factual_counterfactual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_stats: Option<RepoStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<TrustSummary>,
}

impl EnrichedRecord {
    pub fn from_metadata(metadata: RecordMetadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Key matched against the work list on resume.
    pub fn resume_key(&self) -> String {
        if self.identifier.is_empty() {
            self.metadata.name.to_ascii_lowercase()
        } else {
            self.identifier.to_ascii_lowercase()
        }
    }
}
