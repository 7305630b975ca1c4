//! Offline collaborator backed by a directory of `<identifier>.json` files.
//!
//! Each file holds the record metadata plus optional `stats` and `scrape`
//! objects:
//!
//! ```json
//! {"name": "demo-lib", "version": "1.2.0", "readme": "...",
//!  "stats": {"stars": 120, "forks": 8},
//!  "scrape": {"docs_rs": {"title": "demo-lib", "content": "...", "quality_score": 0.8}}}
//! ```
use super::{derive_readme_fields, DocScraper, MetadataClient, StatsClient};
use crate::error::SourceError;
use crate::model::{RecordMetadata, RepoStats, ScrapeResult};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct FixtureFile {
    #[serde(flatten)]
    metadata: RecordMetadata,
    #[serde(default)]
    stats: Option<RepoStats>,
    #[serde(default)]
    scrape: BTreeMap<String, ScrapeResult>,
}

#[derive(Debug)]
pub struct FixtureSource {
    /// Keyed by lowercased name, matching the normalized work list.
    records: BTreeMap<String, FixtureFile>,
}

impl FixtureSource {
    /// Load every `*.json` fixture under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!("fixtures directory {} does not exist", root.display()));
        }
        let mut records = BTreeMap::new();
        let entries =
            fs::read_dir(root).with_context(|| format!("read fixtures {}", root.display()))?;
        for entry in entries {
            let path = entry.context("read fixture entry")?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            let mut fixture: FixtureFile = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse fixture {}", path.display()))?;
            derive_readme_fields(&mut fixture.metadata);
            records.insert(fixture.metadata.name.to_ascii_lowercase(), fixture);
        }
        tracing::debug!(root = %root.display(), count = records.len(), "fixtures loaded");
        Ok(Self { records })
    }

    fn get(&self, identifier: &str) -> Option<&FixtureFile> {
        self.records.get(&identifier.trim().to_ascii_lowercase())
    }
}

impl MetadataClient for FixtureSource {
    fn fetch(&self, identifier: &str) -> Result<RecordMetadata, SourceError> {
        self.get(identifier)
            .map(|fixture| fixture.metadata.clone())
            .ok_or_else(|| SourceError::NotFound(identifier.to_string()))
    }
}

impl StatsClient for FixtureSource {
    fn batch_stats(&self, repo_urls: &[String]) -> BTreeMap<String, RepoStats> {
        self.records
            .values()
            .filter(|fixture| repo_urls.contains(&fixture.metadata.repository))
            .filter_map(|fixture| {
                let stats = fixture.stats.clone()?;
                Some((fixture.metadata.repository.clone(), stats))
            })
            .collect()
    }
}

impl DocScraper for FixtureSource {
    fn scrape(&self, identifier: &str) -> BTreeMap<String, ScrapeResult> {
        self.get(identifier)
            .map(|fixture| fixture.scrape.clone())
            .unwrap_or_default()
    }
}
