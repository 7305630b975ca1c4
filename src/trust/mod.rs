//! Trust decision engine: canonicalize, validate context, reason, score,
//! decide, and audit one record.
//!
//! Any stage may end the chain with a [`TrustError`]; no partial trace is
//! produced in that case. A trace that leaves the engine has been verified
//! against its own execution id.
pub mod reasoning;
pub mod scoring;
pub mod trace;

use crate::canon::{CanonRegistry, DEFAULT_MIN_AUTHORITY};
use crate::error::TrustError;
use crate::inference::ValidatedInference;
use crate::model::{RecordMetadata, RepoStats, TrustSummary, UseCase};
use crate::util::now_epoch_ms;
use reasoning::{run_reasoning, Reasoning, ReasoningInput};
use scoring::{confidence, decide, score_criteria, suggestion, CriteriaScores, Signals};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
pub use trace::{TrustChainTrace, TrustVerdict};

/// Longest accepted identifier.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Stages of one chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStage {
    Canonicalizing,
    ContextValidating,
    Reasoning,
    Scoring,
    Deciding,
    Auditing,
    Done,
    Error,
}

impl fmt::Display for ChainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainStage::Canonicalizing => "canonicalizing",
            ChainStage::ContextValidating => "context_validating",
            ChainStage::Reasoning => "reasoning",
            ChainStage::Scoring => "scoring",
            ChainStage::Deciding => "deciding",
            ChainStage::Auditing => "auditing",
            ChainStage::Done => "done",
            ChainStage::Error => "error",
        };
        f.write_str(name)
    }
}

/// A verified trace plus the typed values it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustReport {
    pub trace: TrustChainTrace,
    pub quality_score: f64,
    pub criteria: CriteriaScores,
}

impl TrustReport {
    pub fn summary(&self) -> TrustSummary {
        TrustSummary {
            execution_id: self.trace.execution_id.clone(),
            verdict: self.trace.verdict,
            confidence: self.trace.confidence,
            quality_score: self.quality_score,
            criteria: self.criteria.to_map(),
            canon_sources: self.trace.context_sources.clone(),
            reasoning_trace: self.trace.reasoning_steps.clone(),
            suggestion: self.trace.suggestion.clone(),
        }
    }
}

/// Aggregate over every trace the engine has produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub total_executions: u64,
    pub verdicts: BTreeMap<String, u64>,
    pub average_confidence: f64,
    pub canon_version: String,
    pub last_execution: Option<String>,
}

#[derive(Debug, Default)]
struct ExecutionState {
    log: Vec<TrustChainTrace>,
    total: u64,
    verdicts: BTreeMap<String, u64>,
    confidence_sum: f64,
    last_execution: Option<String>,
}

/// Per-record input to [`TrustDecisionEngine::analyze`].
#[derive(Debug, Clone, Copy)]
pub struct TrustInput<'a> {
    pub identifier: &'a str,
    pub metadata: &'a RecordMetadata,
    pub repo_stats: Option<&'a RepoStats>,
    pub known_use_case: Option<UseCase>,
}

pub struct TrustDecisionEngine {
    canon: Arc<CanonRegistry>,
    inference: Arc<ValidatedInference>,
    min_authority: u8,
    sequence: AtomicU64,
    state: Mutex<ExecutionState>,
}

/// Trim, lowercase, and check the identifier charset and length.
pub fn canonicalize(identifier: &str) -> Result<String, TrustError> {
    let invalid = |reason: &str| TrustError::InvalidInput {
        input: identifier.to_string(),
        reason: reason.to_string(),
    };
    let clean = identifier.trim().to_lowercase();
    if clean.is_empty() {
        return Err(invalid("empty identifier"));
    }
    if clean.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("identifier longer than 64 characters"));
    }
    if !clean
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid("only [a-z0-9_-] allowed"));
    }
    if clean.starts_with('-') || clean.ends_with('-') {
        return Err(invalid("leading or trailing hyphen"));
    }
    Ok(clean)
}

impl TrustDecisionEngine {
    pub fn new(canon: Arc<CanonRegistry>, inference: Arc<ValidatedInference>) -> Self {
        Self {
            canon,
            inference,
            min_authority: DEFAULT_MIN_AUTHORITY,
            sequence: AtomicU64::new(0),
            state: Mutex::new(ExecutionState::default()),
        }
    }

    pub fn with_min_authority(mut self, min_authority: u8) -> Self {
        self.min_authority = min_authority;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the full chain for one record.
    pub fn analyze(&self, input: &TrustInput<'_>) -> Result<TrustReport, TrustError> {
        let mut stage = ChainStage::Canonicalizing;
        let result = self.run_chain(input, &mut stage);
        match &result {
            Ok(report) => tracing::info!(
                record = report.trace.input.as_str(),
                verdict = %report.trace.verdict,
                confidence = report.trace.confidence,
                score = report.quality_score,
                "trust chain complete"
            ),
            Err(err) => {
                tracing::warn!(
                    record = input.identifier,
                    failed_stage = %stage,
                    %err,
                    "trust chain failed"
                );
                advance(&mut stage, ChainStage::Error, input.identifier);
            }
        }
        result
    }

    fn run_chain(
        &self,
        input: &TrustInput<'_>,
        stage: &mut ChainStage,
    ) -> Result<TrustReport, TrustError> {
        let canonical = canonicalize(input.identifier)?;

        advance(stage, ChainStage::ContextValidating, &canonical);
        let context_sources = self.canon.valid_sources(self.min_authority)?;

        advance(stage, ChainStage::Reasoning, &canonical);
        let mut reasoning = run_reasoning(
            &self.inference,
            &ReasoningInput {
                metadata: input.metadata,
                repo_stats: input.repo_stats,
                known_use_case: input.known_use_case,
            },
        );

        advance(stage, ChainStage::Scoring, &canonical);
        let criteria = score_criteria(&Signals {
            metadata: input.metadata,
            repo_stats: input.repo_stats,
            doc_ratings: reasoning.doc_ratings.value,
            sentiment: reasoning.sentiment.value,
            now_epoch_ms: now_epoch_ms(),
        });
        let quality_score = criteria.weighted_total();
        reasoning
            .steps
            .push(format!("Synthesized quality score: {quality_score:.2}/10"));

        advance(stage, ChainStage::Deciding, &canonical);
        let (verdict, reason) = decide(&reasoning.steps, quality_score, &criteria.values());
        let suggestion = suggestion(quality_score);

        advance(stage, ChainStage::Auditing, &canonical);
        let confidence = confidence(
            context_sources.len(),
            reasoning.steps.len(),
            quality_score,
            Some(verdict),
        );
        let audit_info = audit_info(input, &reasoning, &criteria, reason);
        let created_at_epoch_ms = now_epoch_ms();
        let hash = trace::content_hash(
            &canonical,
            &context_sources,
            &reasoning.steps,
            &suggestion,
        );
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let trace = TrustChainTrace {
            execution_id: trace::execution_id(&hash, sequence, created_at_epoch_ms),
            input: canonical,
            context_sources,
            reasoning_steps: reasoning.steps,
            suggestion,
            verdict,
            audit_info,
            confidence,
            created_at_epoch_ms,
            canon_version: self.canon.version().to_string(),
        };
        let trace = self.seal(trace)?;

        advance(stage, ChainStage::Done, &trace.input);
        Ok(TrustReport {
            trace,
            quality_score,
            criteria,
        })
    }

    /// Record a trace in the execution log, refusing it if its hash does not
    /// match its execution id.
    pub fn seal(&self, trace: TrustChainTrace) -> Result<TrustChainTrace, TrustError> {
        if !trace.verify_integrity() {
            return Err(TrustError::IntegrityViolation {
                execution_id: trace.execution_id,
            });
        }
        let mut state = self.lock();
        state.total += 1;
        *state
            .verdicts
            .entry(trace.verdict.as_str().to_string())
            .or_insert(0) += 1;
        state.confidence_sum += trace.confidence;
        state.last_execution = Some(trace.execution_id.clone());
        state.log.push(trace.clone());
        Ok(trace)
    }

    pub fn audit_summary(&self) -> AuditSummary {
        let state = self.lock();
        let average_confidence = if state.total == 0 {
            0.0
        } else {
            state.confidence_sum / state.total as f64
        };
        AuditSummary {
            total_executions: state.total,
            verdicts: state.verdicts.clone(),
            average_confidence,
            canon_version: self.canon.version().to_string(),
            last_execution: state.last_execution.clone(),
        }
    }

    /// Take the traces logged since the last drain. Summary counters keep
    /// their totals.
    pub fn drain_execution_log(&self) -> Vec<TrustChainTrace> {
        std::mem::take(&mut self.lock().log)
    }
}

fn advance(stage: &mut ChainStage, next: ChainStage, record: &str) {
    tracing::debug!(record, from = %stage, to = %next, "trust chain stage");
    *stage = next;
}

fn audit_info(
    input: &TrustInput<'_>,
    reasoning: &Reasoning,
    criteria: &CriteriaScores,
    decision_reason: &str,
) -> BTreeMap<String, Value> {
    BTreeMap::from([
        (
            "input_snapshot".to_string(),
            json!({
                "name": input.metadata.name,
                "version": input.metadata.version,
                "downloads": input.metadata.downloads,
                "repository": input.metadata.repository,
            }),
        ),
        ("criteria".to_string(), json!(criteria.to_map())),
        ("doc_ratings".to_string(), json!(reasoning.doc_ratings.value)),
        (
            "sentiment".to_string(),
            json!(reasoning.sentiment.value.as_str()),
        ),
        ("ecosystem".to_string(), json!(reasoning.ecosystem.value)),
        (
            "degraded_steps".to_string(),
            json!(reasoning.degraded_steps()),
        ),
        ("decision_reason".to_string(), json!(decision_reason)),
        ("engine".to_string(), json!(env!("CARGO_PKG_VERSION"))),
    ])
}

#[cfg(test)]
#[path = "trust_tests.rs"]
mod tests;
