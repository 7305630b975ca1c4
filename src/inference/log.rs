//! Inference logging for enrichment transparency.
//!
//! Every validated inference call appends one entry to
//! `inference_log.jsonl` in the output directory, so a reader can see which
//! prompts validated, how many attempts they took, and what they cost.
//!
//! ```jsonl
//! {"schema_version":1,"ts":1707900000000,"task":"classification","subject":"serde",...}
//! ```
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use crate::util::{now_epoch_ms, truncate_string};

/// Current schema version for inference_log.jsonl entries.
pub const INFERENCE_LOG_SCHEMA_VERSION: u32 = 1;
pub const INFERENCE_LOG_FILE: &str = "inference_log.jsonl";

const PROMPT_PREVIEW_BYTES: usize = 500;

/// Kinds of inference calls made while enriching and analyzing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceTask {
    ReadmeSummary,
    FeatureSummary,
    Classification,
    FactualPairs,
    DocQuality,
    Sentiment,
    Ecosystem,
}

impl std::fmt::Display for InferenceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ReadmeSummary => "readme_summary",
            Self::FeatureSummary => "feature_summary",
            Self::Classification => "classification",
            Self::FactualPairs => "factual_pairs",
            Self::DocQuality => "doc_quality",
            Self::Sentiment => "sentiment",
            Self::Ecosystem => "ecosystem",
        };
        f.write_str(label)
    }
}

/// Outcome of a validated inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceOutcome {
    /// An attempt produced output that passed validation.
    Validated,
    /// Attempts were exhausted; the last output was kept unvalidated.
    Unvalidated,
    /// No attempt produced any output.
    Failed,
}

/// A single inference log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceLogEntry {
    pub schema_version: u32,
    /// Unix timestamp in milliseconds when the entry was written.
    pub ts: u64,
    pub task: InferenceTask,
    /// Record the call was made for.
    pub subject: String,
    pub duration_ms: u64,
    pub attempts: u32,
    pub outcome: InferenceOutcome,
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    #[serde(default)]
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_preview: Option<String>,
}

/// Builder for constructing inference log entries with timing.
pub struct InferenceLogBuilder {
    start: Instant,
    task: InferenceTask,
    subject: String,
    prompt_preview: Option<String>,
    prompt_tokens: usize,
    completion_tokens: usize,
    cost: f64,
    last_error: Option<String>,
}

impl InferenceLogBuilder {
    pub fn new(task: InferenceTask, subject: &str) -> Self {
        Self {
            start: Instant::now(),
            task,
            subject: subject.to_string(),
            prompt_preview: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            last_error: None,
        }
    }

    /// Set a preview of the prompt (truncated to 500 bytes).
    pub fn with_prompt_preview(mut self, prompt: &str) -> Self {
        let preview = if prompt.len() > PROMPT_PREVIEW_BYTES {
            format!("{}...", truncate_string(prompt, PROMPT_PREVIEW_BYTES))
        } else {
            prompt.to_string()
        };
        self.prompt_preview = Some(preview);
        self
    }

    /// Accumulate the usage of one billed backend call.
    pub fn record_call(&mut self, prompt_tokens: usize, completion_tokens: usize, cost: f64) {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;
        self.cost += cost;
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn finish(self, attempts: u32, outcome: InferenceOutcome) -> InferenceLogEntry {
        InferenceLogEntry {
            schema_version: INFERENCE_LOG_SCHEMA_VERSION,
            ts: now_epoch_ms(),
            task: self.task,
            subject: self.subject,
            duration_ms: self.start.elapsed().as_millis() as u64,
            attempts,
            outcome,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            cost: self.cost,
            error: self.last_error,
            prompt_preview: self.prompt_preview,
        }
    }
}

/// Append-only JSONL writer shared by all workers of a run.
#[derive(Debug)]
pub struct InferenceLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl InferenceLog {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(INFERENCE_LOG_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry to the log file.
    pub fn append(&self, entry: &InferenceLogEntry) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create output directory for inference log")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open inference log for append: {}", self.path.display()))?;
        let line = serde_json::to_string(entry).context("serialize inference log entry")?;
        writeln!(file, "{}", line).context("write inference log entry")?;
        Ok(())
    }
}

/// Load all inference log entries, skipping corrupt lines.
pub fn load_inference_log(path: &Path) -> Result<Vec<InferenceLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file =
        File::open(path).with_context(|| format!("open inference log: {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {} of inference log", line_num + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InferenceLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(line = line_num + 1, %err, "skip corrupt inference log entry");
            }
        }
    }
    Ok(entries)
}
