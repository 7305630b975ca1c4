//! GitHub repository statistics client.
use super::{github_slug, StatsClient, USER_AGENT};
use crate::model::RepoStats;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const API_BASE: &str = "https://api.github.com/repos";
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Deserialize)]
struct RepoResponse {
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    open_issues_count: u64,
    #[serde(default)]
    subscribers_count: Option<u64>,
    #[serde(default)]
    watchers_count: u64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    pushed_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

pub struct GitHubClient {
    agent: ureq::Agent,
    token: Option<String>,
}

impl GitHubClient {
    /// Authenticate with `GITHUB_TOKEN` when set.
    pub fn from_env(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        let token = std::env::var(TOKEN_ENV).ok().filter(|token| !token.is_empty());
        Self { agent, token }
    }

    fn repo_stats(&self, owner: &str, repo: &str) -> Result<RepoStats, String> {
        let url = format!("{API_BASE}/{owner}/{repo}");
        let mut request = self
            .agent
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }
        let mut response = request.call().map_err(|err| format!("GET {url}: {err}"))?;
        let repo: RepoResponse = response
            .body_mut()
            .read_json()
            .map_err(|err| format!("decode {url}: {err}"))?;
        let last_update = repo.pushed_at.or(repo.updated_at);
        Ok(RepoStats {
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            open_issues: repo.open_issues_count,
            watchers: repo.subscribers_count.unwrap_or(repo.watchers_count),
            language: repo.language,
            updated_at_epoch_ms: last_update.as_deref().and_then(parse_rfc3339_ms),
        })
    }
}

impl StatsClient for GitHubClient {
    fn batch_stats(&self, repo_urls: &[String]) -> BTreeMap<String, RepoStats> {
        let mut stats = BTreeMap::new();
        for url in repo_urls {
            let Some((owner, repo)) = github_slug(url) else {
                continue;
            };
            match self.repo_stats(&owner, &repo) {
                Ok(repo_stats) => {
                    stats.insert(url.clone(), repo_stats);
                }
                Err(err) => tracing::warn!(repo = url.as_str(), %err, "repo stats unavailable"),
            }
        }
        stats
    }
}

/// Epoch milliseconds for an RFC 3339 timestamp.
pub fn parse_rfc3339_ms(raw: &str) -> Option<u64> {
    let parsed = OffsetDateTime::parse(raw, &Rfc3339).ok()?;
    u64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_timestamps_convert_to_epoch_ms() {
        assert_eq!(parse_rfc3339_ms("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(
            parse_rfc3339_ms("2024-01-02T03:04:05Z"),
            Some(1_704_164_645_000)
        );
        assert_eq!(parse_rfc3339_ms("yesterday"), None);
    }
}
