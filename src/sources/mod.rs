//! Collaborators that supply record metadata, repository statistics, and
//! scraped documentation.
//!
//! The engine only sees the traits below; `crates_io`, `github` and `docs`
//! talk to the public services, while `fixtures` serves the same data from a
//! directory of JSON files for offline runs.
pub mod crates_io;
pub mod docs;
pub mod fixtures;
pub mod github;

use crate::config::SourcesConfig;
use crate::error::SourceError;
use crate::model::{RecordMetadata, RepoStats, ScrapeResult};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const USER_AGENT: &str = concat!("ctrust/", env!("CARGO_PKG_VERSION"));

/// Package metadata lookup.
pub trait MetadataClient: Send + Sync {
    fn fetch(&self, identifier: &str) -> Result<RecordMetadata, SourceError>;
}

/// Repository statistics lookup, keyed by the repository URL as given.
pub trait StatsClient: Send + Sync {
    fn batch_stats(&self, repo_urls: &[String]) -> BTreeMap<String, RepoStats>;
}

/// Documentation scraping, keyed by source name (`docs_rs`, `lib_rs`, ...).
/// Failed sources carry `error` instead of being omitted.
pub trait DocScraper: Send + Sync {
    fn scrape(&self, identifier: &str) -> BTreeMap<String, ScrapeResult>;
}

/// The collaborators a run was configured with.
#[derive(Clone)]
pub struct Sources {
    pub metadata: Arc<dyn MetadataClient>,
    pub stats: Option<Arc<dyn StatsClient>>,
    pub scraper: Option<Arc<dyn DocScraper>>,
}

/// Build collaborators from config.
pub fn build_sources(config: &SourcesConfig) -> Result<Sources> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    match &config.fixtures_dir {
        Some(dir) => {
            let fixtures = Arc::new(fixtures::FixtureSource::open(dir)?);
            Ok(Sources {
                metadata: fixtures.clone(),
                stats: Some(fixtures.clone()),
                scraper: config.scraping.then(|| fixtures.clone() as Arc<dyn DocScraper>),
            })
        }
        None => Ok(Sources {
            metadata: Arc::new(crates_io::CratesIoClient::new(timeout)),
            stats: Some(Arc::new(github::GitHubClient::from_env(timeout))),
            scraper: config
                .scraping
                .then(|| Arc::new(docs::DocsScraper::new(timeout)) as Arc<dyn DocScraper>),
        }),
    }
}

fn github_slug_regex() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| {
        Regex::new(r"github\.com[/:]([^/\s]+)/([^/\s#?]+)").expect("regex for GitHub slugs")
    })
}

/// `(owner, repo)` for a GitHub repository URL.
pub fn github_slug(repo_url: &str) -> Option<(String, String)> {
    let caps = github_slug_regex().captures(repo_url)?;
    let owner = caps.get(1)?.as_str().to_string();
    let repo = caps.get(2)?.as_str().trim_end_matches(".git").to_string();
    if repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

/// Content-richness score in [0, 1] for a scraped page.
pub fn scrape_quality(content: &str, structured_data: &serde_json::Value) -> f64 {
    let mut score = 0.0;
    let words = content.split_whitespace().count();
    if words > 100 {
        score += 0.3;
    }
    if words > 500 {
        score += 0.2;
    }
    let fields = match structured_data {
        serde_json::Value::Object(map) => map.len(),
        serde_json::Value::Null => 0,
        _ => 1,
    };
    if fields > 0 {
        score += 0.3;
        if fields > 3 {
            score += 0.1;
        }
    }
    if content.contains("```") || content.contains("<code>") {
        score += 0.1;
    }
    f64::min(score, 1.0)
}

/// Fenced code blocks in a markdown readme.
pub fn extract_code_snippets(readme: &str) -> Vec<String> {
    let mut snippets = Vec::new();
    let mut current: Option<String> = None;
    for line in readme.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(block) => {
                    if !block.trim().is_empty() {
                        snippets.push(block.trim_end().to_string());
                    }
                }
                None => current = Some(String::new()),
            }
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    snippets
}

/// Markdown sections keyed by heading text; text before the first heading is
/// filed under `Introduction`.
pub fn extract_readme_sections(readme: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut heading = "Introduction".to_string();
    let mut body = String::new();
    for line in readme.lines() {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level > 0 && trimmed[level..].starts_with(' ') {
            if !body.trim().is_empty() {
                sections.insert(heading.clone(), body.trim().to_string());
            }
            heading = trimmed[level..].trim().to_string();
            body.clear();
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    if !body.trim().is_empty() {
        sections.insert(heading, body.trim().to_string());
    }
    sections
}

/// Fill readme-derived fields when the source did not provide them.
pub fn derive_readme_fields(metadata: &mut RecordMetadata) {
    if metadata.code_snippets.is_empty() {
        metadata.code_snippets = extract_code_snippets(&metadata.readme);
    }
    if metadata.readme_sections.is_empty() {
        metadata.readme_sections = extract_readme_sections(&metadata.readme);
    }
}
