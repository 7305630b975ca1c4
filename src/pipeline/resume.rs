//! Work remaining for a run, derived from what the output directory already
//! holds. Nothing here is persisted; the checkpoint files are the state.
use super::checkpoint::{CHECKPOINT_PREFIX, RECORD_SUFFIX};
use crate::model::EnrichedRecord;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeState {
    pub total: usize,
    pub processed: usize,
    /// Unfinished names in work-list order.
    pub remaining: Vec<String>,
}

impl ResumeState {
    pub fn compute(work: &[String], completed: &BTreeMap<String, EnrichedRecord>) -> Self {
        let remaining: Vec<String> = work
            .iter()
            .filter(|name| !completed.contains_key(name.as_str()))
            .cloned()
            .collect();
        Self {
            total: work.len(),
            processed: work.len() - remaining.len(),
            remaining,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Records already finished under `root`, keyed by [`EnrichedRecord::resume_key`].
///
/// Per-record files win over checkpoint lines. Unreadable files and corrupt
/// lines are skipped with a warning so their records are processed again.
pub fn scan_completed(root: &Path) -> Result<BTreeMap<String, EnrichedRecord>> {
    let mut completed = BTreeMap::new();
    if !root.is_dir() {
        return Ok(completed);
    }
    let mut record_files = Vec::new();
    let mut checkpoints = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let path = entry.context("read output entry")?.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if file_name.ends_with(RECORD_SUFFIX) {
            record_files.push(path);
        } else if file_name.starts_with(CHECKPOINT_PREFIX) && file_name.ends_with(".jsonl") {
            checkpoints.push(path);
        }
    }
    record_files.sort();
    checkpoints.sort();

    for path in record_files {
        let parsed = fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| {
                serde_json::from_slice::<EnrichedRecord>(&bytes).map_err(anyhow::Error::from)
            });
        match parsed {
            Ok(record) => {
                completed.insert(record.resume_key(), record);
            }
            Err(err) => tracing::warn!(path = %path.display(), %err, "skipping unreadable record file"),
        }
    }

    for path in checkpoints {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "skipping unreadable checkpoint");
                continue;
            }
        };
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EnrichedRecord>(line) {
                Ok(record) => {
                    completed.entry(record.resume_key()).or_insert(record);
                }
                Err(err) => tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    %err,
                    "skipping corrupt checkpoint line"
                ),
            }
        }
    }
    tracing::debug!(root = %root.display(), completed = completed.len(), "resume scan");
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordMetadata;
    use crate::pipeline::checkpoint::CheckpointStore;

    fn record(name: &str, version: &str) -> EnrichedRecord {
        EnrichedRecord::from_metadata(RecordMetadata {
            name: name.to_string(),
            version: version.to_string(),
            ..RecordMetadata::default()
        })
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn missing_root_means_nothing_completed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let completed = scan_completed(&dir.path().join("absent")).expect("scan");
        assert!(completed.is_empty());
    }

    #[test]
    fn record_files_and_checkpoint_lines_both_count() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = CheckpointStore::open(dir.path()).expect("open store");
        store
            .persist_record(&record("alpha", "2.0.0"), None)
            .expect("persist alpha");
        store
            .write_checkpoint(1, &[record("alpha", "1.0.0"), record("beta", "1.0.0")], "ts")
            .expect("checkpoint");

        let completed = scan_completed(dir.path()).expect("scan");
        assert_eq!(completed.len(), 2);
        assert_eq!(completed["alpha"].metadata.version, "2.0.0");

        let state = ResumeState::compute(&names(&["gamma", "alpha", "beta", "delta"]), &completed);
        assert_eq!(state.total, 4);
        assert_eq!(state.processed, 2);
        assert_eq!(state.remaining, names(&["gamma", "delta"]));
    }

    #[test]
    fn corrupt_lines_and_files_are_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let good = serde_json::to_string(&record("beta", "1.0.0")).expect("serialize");
        fs::write(
            dir.path().join("checkpoint_batch_1_ts.jsonl"),
            format!("{{not json\n{good}\n"),
        )
        .expect("write checkpoint");
        fs::write(dir.path().join("alpha_enriched.json"), "{").expect("write record");

        let completed = scan_completed(dir.path()).expect("scan");
        assert_eq!(completed.keys().collect::<Vec<_>>(), vec!["beta"]);
    }

    #[test]
    fn recomputing_after_completion_leaves_no_work() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = CheckpointStore::open(dir.path()).expect("open store");
        let work = names(&["alpha", "beta"]);
        for name in &work {
            store
                .persist_record(&record(name, "1.0.0"), None)
                .expect("persist");
        }
        let state = ResumeState::compute(&work, &scan_completed(dir.path()).expect("scan"));
        assert!(state.is_complete());
        assert_eq!(state.processed, 2);
    }
}
