//! Batch orchestration: drive a list of record names through metadata fetch,
//! enrichment, and the trust engine, checkpointing after every batch.
//!
//! Batches run one after another. Inside a batch, fetches, scrapes, and
//! per-record analysis fan out over a bounded pool of scoped threads.
pub mod checkpoint;
pub mod memory;
pub mod resume;

use crate::canon::CanonRegistry;
use crate::config::PipelineConfig;
use crate::enrich::{popularity_score, Enricher};
use crate::inference::ValidatedInference;
use crate::model::{EnrichedRecord, RecordMetadata, RepoStats, ScrapeResult, ScrapeSummary};
use crate::sources::Sources;
use crate::trust::{AuditSummary, TrustChainTrace, TrustDecisionEngine, TrustInput};
use crate::util::run_timestamp;
use anyhow::Result;
use checkpoint::{CheckpointStore, FinalOutputs};
use memory::{MemoryGuard, ProcessMemory};
use resume::{scan_completed, ResumeState};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Scraped docs.rs pages above this quality may replace the readme.
const README_REPLACE_QUALITY: f64 = 0.7;
const DOCS_RS_SOURCE: &str = "docs_rs";

/// Plain options the orchestrator runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub estimated_record_cost: f64,
    pub enrichment: bool,
    pub min_authority: u8,
    pub memory_limit_mb: u64,
    pub memory_pause: Duration,
    pub memory_max_pauses: u32,
    /// Names counted as skipped and never processed.
    pub skip: Vec<String>,
    /// Ignore earlier outputs and process every name again.
    pub force_restart: bool,
}

impl RunOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            workers: config.workers,
            estimated_record_cost: config.estimated_record_cost,
            enrichment: config.enrichment,
            min_authority: config.min_authority,
            memory_limit_mb: config.memory_limit_mb,
            memory_pause: Duration::from_millis(config.memory_pause_ms),
            memory_max_pauses: config.memory_max_pauses,
            skip: Vec::new(),
            force_restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    BudgetExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Names left to consider after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkList {
    /// Lowercased, deduplicated, in first-seen order.
    pub names: Vec<String>,
    /// Distinct names removed by the skip list.
    pub skipped: usize,
}

pub fn work_list(names: &[String], skip: &[String]) -> WorkList {
    let skip: BTreeSet<String> = skip
        .iter()
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();
    let mut seen = BTreeSet::new();
    let mut work = WorkList::default();
    for name in names {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        if skip.contains(&name) {
            work.skipped += 1;
            continue;
        }
        work.names.push(name);
    }
    work
}

/// Outcome of one `run`, always reported even when the run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub total: usize,
    /// Finished by an earlier run.
    pub already_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Left for a later run after a budget stop.
    pub unprocessed: usize,
    pub batches: usize,
    pub stop_reason: StopReason,
    pub total_cost: f64,
    pub inference_calls: u64,
    pub audit: AuditSummary,
    pub outputs: Option<FinalOutputs>,
}

enum RecordOutcome {
    Finished(Box<FinishedRecord>),
    Failed,
    NotStarted,
}

/// A fetched record ready for analysis, still tied to its work-list name.
struct PreparedRecord {
    identifier: String,
    metadata: RecordMetadata,
    repo_stats: Option<RepoStats>,
}

struct FinishedRecord {
    record: EnrichedRecord,
    trace: TrustChainTrace,
}

#[derive(Default)]
struct BatchOutcome {
    finished: Vec<FinishedRecord>,
    failed: usize,
    not_started: usize,
}

pub struct BatchOrchestrator {
    options: RunOptions,
    sources: Sources,
    inference: Arc<ValidatedInference>,
    enricher: Enricher,
    engine: TrustDecisionEngine,
    memory: MemoryGuard,
    store: CheckpointStore,
}

impl BatchOrchestrator {
    pub fn new(
        options: RunOptions,
        sources: Sources,
        inference: Arc<ValidatedInference>,
        canon: Arc<CanonRegistry>,
        store: CheckpointStore,
    ) -> Self {
        let memory = MemoryGuard::new(
            Box::new(ProcessMemory),
            options.memory_limit_mb,
            options.memory_pause,
            options.memory_max_pauses,
        );
        let engine = TrustDecisionEngine::new(canon, inference.clone())
            .with_min_authority(options.min_authority);
        Self {
            enricher: Enricher::new(inference.clone()),
            engine,
            memory,
            options,
            sources,
            inference,
            store,
        }
    }

    pub fn run(&self, names: &[String]) -> Result<RunReport> {
        let timestamp = run_timestamp();
        let WorkList { names: work, skipped } = work_list(names, &self.options.skip);
        let completed = self.completed()?;
        let state = ResumeState::compute(&work, &completed);
        tracing::info!(
            total = state.total,
            processed = state.processed,
            remaining = state.remaining.len(),
            skipped,
            "resume state"
        );

        // Earlier results stay in the accumulator so checkpoints and final
        // outputs cover the whole work list.
        let mut accumulated: Vec<EnrichedRecord> = work
            .iter()
            .filter_map(|name| completed.get(name.as_str()).cloned())
            .collect();

        let batch_size = self.options.batch_size.max(1);
        let batch_count = state.remaining.len().div_ceil(batch_size);
        let budget = self.inference.budget();
        let mut report = RunReport {
            total: state.total,
            already_processed: state.processed,
            succeeded: 0,
            failed: 0,
            skipped,
            unprocessed: 0,
            batches: 0,
            stop_reason: StopReason::Completed,
            total_cost: 0.0,
            inference_calls: 0,
            audit: self.engine.audit_summary(),
            outputs: None,
        };

        for (index, batch) in state.remaining.chunks(batch_size).enumerate() {
            if index > 0 {
                self.memory.check();
            }
            if budget.is_exhausted() {
                report.stop_reason = StopReason::BudgetExhausted;
                report.unprocessed += state.remaining.len() - index * batch_size;
                break;
            }
            tracing::info!(
                batch = index + 1,
                batches = batch_count,
                records = batch.len(),
                "processing batch"
            );
            let outcome = self.process_batch(batch);
            report.batches += 1;
            report.failed += outcome.failed;
            report.unprocessed += outcome.not_started;

            for finished in outcome.finished {
                match self
                    .store
                    .persist_record(&finished.record, Some(&finished.trace))
                {
                    Ok(_) => {
                        report.succeeded += 1;
                        accumulated.push(finished.record);
                    }
                    Err(err) => {
                        tracing::error!(
                            record = finished.record.name(),
                            err = %format!("{err:#}"),
                            "record not persisted"
                        );
                        report.failed += 1;
                    }
                }
            }
            // Traces are already in the audit log; draining bounds memory.
            self.engine.drain_execution_log();
            self.store
                .write_checkpoint(index + 1, &accumulated, &timestamp)?;
            tracing::info!(
                batch = index + 1,
                accumulated = accumulated.len(),
                total = state.total,
                "batch complete"
            );

            if outcome.not_started > 0 {
                report.stop_reason = StopReason::BudgetExhausted;
                report.unprocessed += state
                    .remaining
                    .len()
                    .saturating_sub((index + 1) * batch_size);
                break;
            }
        }

        if report.stop_reason == StopReason::BudgetExhausted {
            tracing::warn!(
                spent = budget.total(),
                ceiling = ?budget.ceiling(),
                remaining = budget.remaining(),
                unprocessed = report.unprocessed,
                "budget exhausted, stopping"
            );
        }
        if !accumulated.is_empty() {
            report.outputs = Some(self.store.write_final(&accumulated, &timestamp)?);
        }
        report.total_cost = budget.total();
        report.inference_calls = budget.calls();
        report.audit = self.engine.audit_summary();
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            unprocessed = report.unprocessed,
            "run complete"
        );
        Ok(report)
    }

    fn completed(&self) -> Result<BTreeMap<String, EnrichedRecord>> {
        if self.options.force_restart {
            return Ok(BTreeMap::new());
        }
        scan_completed(self.store.root())
    }

    fn process_batch(&self, batch: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let workers = self.options.workers;

        let mut identifiers = Vec::new();
        let mut fetched = Vec::new();
        for (name, result) in batch
            .iter()
            .zip(fan_out(batch, workers, |name| self.sources.metadata.fetch(name)))
        {
            match result {
                Ok(metadata) => {
                    identifiers.push(name.clone());
                    fetched.push(metadata);
                }
                Err(err) => {
                    tracing::warn!(
                        record = name.as_str(),
                        %err,
                        "metadata fetch failed, dropping record"
                    );
                    outcome.failed += 1;
                }
            }
        }

        let stats = self.batch_stats(&fetched);
        let mut prepared: Vec<PreparedRecord> = identifiers
            .into_iter()
            .zip(fetched)
            .map(|(identifier, mut metadata)| {
                let repo_stats = stats.get(&metadata.repository).cloned();
                if let Some(repo_stats) = &repo_stats {
                    metadata.github_stars = repo_stats.stars;
                }
                PreparedRecord {
                    identifier,
                    metadata,
                    repo_stats,
                }
            })
            .collect();

        if let Some(scraper) = &self.sources.scraper {
            let scraped = fan_out(&prepared, workers, |prepared| {
                scraper.scrape(&prepared.metadata.name)
            });
            for (prepared, results) in prepared.iter_mut().zip(scraped) {
                integrate_scrape(&mut prepared.metadata, results);
            }
        }

        let budget_stop = AtomicBool::new(false);
        let results = fan_out(&prepared, workers, |prepared| {
            self.process_record(prepared, &budget_stop)
        });
        for result in results {
            match result {
                RecordOutcome::Finished(finished) => outcome.finished.push(*finished),
                RecordOutcome::Failed => outcome.failed += 1,
                RecordOutcome::NotStarted => outcome.not_started += 1,
            }
        }
        outcome
    }

    fn batch_stats(&self, records: &[RecordMetadata]) -> BTreeMap<String, RepoStats> {
        let Some(client) = &self.sources.stats else {
            return BTreeMap::new();
        };
        let urls: Vec<String> = records
            .iter()
            .map(|metadata| metadata.repository.clone())
            .filter(|url| !url.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if urls.is_empty() {
            return BTreeMap::new();
        }
        client.batch_stats(&urls)
    }

    fn process_record(&self, prepared: &PreparedRecord, budget_stop: &AtomicBool) -> RecordOutcome {
        let metadata = &prepared.metadata;
        let repo_stats = prepared.repo_stats.as_ref();
        let budget = self.inference.budget();
        if budget_stop.load(Ordering::SeqCst)
            || budget.is_exhausted()
            || budget.would_exceed(self.options.estimated_record_cost)
        {
            budget_stop.store(true, Ordering::SeqCst);
            tracing::debug!(record = metadata.name.as_str(), "budget check failed, not starting");
            return RecordOutcome::NotStarted;
        }

        let mut record = if self.options.enrichment {
            self.enricher.enrich(metadata.clone())
        } else {
            EnrichedRecord {
                score: Some(popularity_score(metadata)),
                ..EnrichedRecord::from_metadata(metadata.clone())
            }
        };
        record.identifier = prepared.identifier.clone();
        record.repo_stats = repo_stats.cloned();

        let input = TrustInput {
            identifier: &metadata.name,
            metadata: &record.metadata,
            repo_stats,
            known_use_case: self.options.enrichment.then_some(record.use_case),
        };
        match self.engine.analyze(&input) {
            Ok(report) => {
                record.trust = Some(report.summary());
                RecordOutcome::Finished(Box::new(FinishedRecord {
                    record,
                    trace: report.trace,
                }))
            }
            // The engine already logged the failing stage.
            Err(_) => RecordOutcome::Failed,
        }
    }
}

/// Fold scraped documentation into the record.
///
/// Failed sources are ignored. A docs.rs page of high quality replaces an
/// empty or shorter readme; structured `features`, `dependencies`, and
/// `examples` are lifted into the record.
pub fn integrate_scrape(metadata: &mut RecordMetadata, results: BTreeMap<String, ScrapeResult>) {
    for (source, result) in results {
        if let Some(err) = &result.error {
            tracing::debug!(
                record = metadata.name.as_str(),
                source = source.as_str(),
                err = err.as_str(),
                "scrape failed"
            );
            continue;
        }
        metadata.enhanced_scraping.insert(
            source.clone(),
            ScrapeSummary {
                title: result.title.clone(),
                quality_score: result.quality_score,
                structured_data: result.structured_data.clone(),
                content_length: result.content.len(),
            },
        );
        if source == DOCS_RS_SOURCE
            && result.quality_score > README_REPLACE_QUALITY
            && (metadata.readme.is_empty() || result.content.len() > metadata.readme.len())
        {
            metadata.readme = result.content;
        }
        if let Some(features) = string_list(&result.structured_data, "features") {
            metadata.enhanced_features = features;
        }
        if let Some(dependencies) = string_list(&result.structured_data, "dependencies") {
            metadata.enhanced_dependencies = dependencies;
        }
        if let Some(examples) = string_list(&result.structured_data, "examples") {
            metadata.code_snippets.extend(examples);
        }
    }
}

fn string_list(structured: &Value, key: &str) -> Option<Vec<String>> {
    let items = structured.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

/// Apply `task` to every item on at most `workers` scoped threads. Results
/// come back in item order.
fn fan_out<T, R, F>(items: &[T], workers: usize, task: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<R>>> = Mutex::new(items.iter().map(|_| None).collect());
    let threads = workers.clamp(1, items.len().max(1));
    thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(index) else {
                    break;
                };
                let result = task(item);
                slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())[index] = Some(result);
            });
        }
    });
    slots
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .flatten()
        .collect()
}
