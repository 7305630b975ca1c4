//! Durable run outputs under one directory.
//!
//! Layout:
//! - `<name>_enriched.json`: one finished record
//! - `checkpoint_batch_<n>_<ts>.jsonl`: every record accumulated after batch `n`
//! - `sigil_audit.jsonl`: one verified trust trace per line
//! - `enriched_crate_metadata_<ts>.jsonl`, `dependency_analysis_<ts>.json`,
//!   `summary_report_<ts>.json`: final outputs
use crate::error::TrustError;
use crate::model::EnrichedRecord;
use crate::trust::TrustChainTrace;
use crate::util::{write_json_atomic, write_jsonl_atomic};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RECORD_SUFFIX: &str = "_enriched.json";
pub const CHECKPOINT_PREFIX: &str = "checkpoint_batch_";
pub const AUDIT_LOG_FILE: &str = "sigil_audit.jsonl";
const TOP_N: usize = 10;

/// Paths of the final outputs of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalOutputs {
    pub records: PathBuf,
    pub dependency_analysis: PathBuf,
    pub summary_report: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyAnalysis {
    /// Direct dependencies restricted to records in the same run.
    pub dependency_graph: BTreeMap<String, Vec<String>>,
    pub reverse_dependencies: BTreeMap<String, Vec<String>>,
    /// `(name, dependents)` pairs, most depended upon first.
    pub most_depended: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularEntry {
    pub name: String,
    pub score: f64,
    pub downloads: u64,
    pub github_stars: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub total_crates: usize,
    pub timestamp: String,
    pub most_popular: Vec<PopularEntry>,
    pub most_depended_upon: Vec<(String, Vec<String>)>,
}

pub fn analyze_dependencies(records: &[EnrichedRecord]) -> DependencyAnalysis {
    let names: BTreeSet<&str> = records.iter().map(EnrichedRecord::name).collect();
    let mut dependency_graph = BTreeMap::new();
    let mut reverse_dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records {
        let deps: Vec<String> = record
            .metadata
            .dependencies
            .iter()
            .map(|dep| dep.crate_id.clone())
            .filter(|id| names.contains(id.as_str()))
            .collect();
        for dep in &deps {
            reverse_dependencies
                .entry(dep.clone())
                .or_default()
                .push(record.name().to_string());
        }
        dependency_graph.insert(record.name().to_string(), deps);
    }
    let mut most_depended: Vec<(String, Vec<String>)> = reverse_dependencies
        .iter()
        .map(|(name, dependents)| (name.clone(), dependents.clone()))
        .collect();
    // Stable sort keeps name order among ties.
    most_depended.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    most_depended.truncate(TOP_N);
    DependencyAnalysis {
        dependency_graph,
        reverse_dependencies,
        most_depended,
    }
}

pub fn summary_report(
    records: &[EnrichedRecord],
    dependencies: &DependencyAnalysis,
    timestamp: &str,
) -> SummaryReport {
    let mut most_popular: Vec<PopularEntry> = records
        .iter()
        .map(|record| PopularEntry {
            name: record.name().to_string(),
            score: record.score.unwrap_or(0.0),
            downloads: record.metadata.downloads,
            github_stars: record.metadata.github_stars,
        })
        .collect();
    most_popular.sort_by(|a, b| b.score.total_cmp(&a.score));
    most_popular.truncate(TOP_N);
    SummaryReport {
        total_crates: records.len(),
        timestamp: timestamp.to_string(),
        most_popular,
        most_depended_upon: dependencies.most_depended.clone(),
    }
}

/// Writer for everything a run persists.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{RECORD_SUFFIX}"))
    }

    pub fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_LOG_FILE)
    }

    /// Persist one finished record. Its trace, when present, is verified and
    /// appended to the audit log first; a corrupt trace persists nothing.
    pub fn persist_record(
        &self,
        record: &EnrichedRecord,
        trace: Option<&TrustChainTrace>,
    ) -> Result<PathBuf> {
        if let Some(trace) = trace {
            self.append_audit(trace)?;
        }
        let path = self.record_path(&record.resume_key());
        write_json_atomic(&path, record)?;
        Ok(path)
    }

    pub fn append_audit(&self, trace: &TrustChainTrace) -> Result<()> {
        if !trace.verify_integrity() {
            return Err(TrustError::IntegrityViolation {
                execution_id: trace.execution_id.clone(),
            }
            .into());
        }
        let path = self.audit_path();
        let mut line = serde_json::to_vec(&trace.to_audit_log()).context("serialize audit line")?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(&line)
            .with_context(|| format!("append {}", path.display()))?;
        Ok(())
    }

    /// `batch_number` is 1-based.
    pub fn write_checkpoint(
        &self,
        batch_number: usize,
        records: &[EnrichedRecord],
        timestamp: &str,
    ) -> Result<PathBuf> {
        let path = self
            .root
            .join(format!("{CHECKPOINT_PREFIX}{batch_number}_{timestamp}.jsonl"));
        write_jsonl_atomic(&path, records)?;
        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "checkpoint written"
        );
        Ok(path)
    }

    pub fn write_final(&self, records: &[EnrichedRecord], timestamp: &str) -> Result<FinalOutputs> {
        let outputs = FinalOutputs {
            records: self
                .root
                .join(format!("enriched_crate_metadata_{timestamp}.jsonl")),
            dependency_analysis: self
                .root
                .join(format!("dependency_analysis_{timestamp}.json")),
            summary_report: self.root.join(format!("summary_report_{timestamp}.json")),
        };
        write_jsonl_atomic(&outputs.records, records)?;
        let dependencies = analyze_dependencies(records);
        write_json_atomic(&outputs.dependency_analysis, &dependencies)?;
        let report = summary_report(records, &dependencies, &report_timestamp());
        write_json_atomic(&outputs.summary_report, &report)?;
        tracing::info!(root = %self.root.display(), records = records.len(), "final outputs written");
        Ok(outputs)
    }
}

fn report_timestamp() -> String {
    let now = time::OffsetDateTime::now_utc();
    time::format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
        .ok()
        .and_then(|format| now.format(&format).ok())
        .unwrap_or_else(|| now.unix_timestamp().to_string())
}
