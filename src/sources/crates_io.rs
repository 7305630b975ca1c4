//! crates.io registry client.
use super::{derive_readme_fields, MetadataClient, USER_AGENT};
use crate::error::SourceError;
use crate::model::{DependencyRef, RecordMetadata};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const API_BASE: &str = "https://crates.io/api/v1/crates";

#[derive(Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
    #[serde(default)]
    versions: Vec<VersionInfo>,
}

#[derive(Deserialize)]
struct CrateInfo {
    name: String,
    #[serde(default)]
    max_version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    downloads: u64,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Deserialize)]
struct VersionInfo {
    num: String,
    #[serde(default)]
    features: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct DependenciesResponse {
    #[serde(default)]
    dependencies: Vec<DependencyRef>,
}

pub struct CratesIoClient {
    agent: ureq::Agent,
}

impl CratesIoClient {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, identifier: &str) -> Result<T, SourceError> {
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| match err {
                ureq::Error::StatusCode(404) => SourceError::NotFound(identifier.to_string()),
                other => SourceError::Transport(format!("GET {url}: {other}")),
            })?;
        response
            .body_mut()
            .read_json()
            .map_err(|err| SourceError::Decode(format!("{url}: {err}")))
    }

    fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| SourceError::Transport(format!("GET {url}: {err}")))?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|err| SourceError::Decode(format!("{url}: {err}")))
    }
}

impl MetadataClient for CratesIoClient {
    fn fetch(&self, identifier: &str) -> Result<RecordMetadata, SourceError> {
        let info: CrateResponse = self.get_json(&format!("{API_BASE}/{identifier}"), identifier)?;
        let version = info.krate.max_version.clone();
        let features = info
            .versions
            .into_iter()
            .find(|candidate| candidate.num == version)
            .map(|candidate| candidate.features)
            .unwrap_or_default();

        // Readme and dependency listings are optional; a record without them is still usable.
        let readme = self
            .get_text(&format!("{API_BASE}/{identifier}/{version}/readme"))
            .unwrap_or_else(|err| {
                tracing::debug!(identifier, %err, "readme unavailable");
                String::new()
            });
        let dependencies = self
            .get_json::<DependenciesResponse>(
                &format!("{API_BASE}/{identifier}/{version}/dependencies"),
                identifier,
            )
            .map(|deps| deps.dependencies)
            .unwrap_or_else(|err| {
                tracing::debug!(identifier, %err, "dependencies unavailable");
                Vec::new()
            });

        let mut metadata = RecordMetadata {
            name: info.krate.name,
            version,
            description: info.krate.description.unwrap_or_default(),
            repository: info.krate.repository.unwrap_or_default(),
            keywords: info.krate.keywords,
            categories: info.krate.categories,
            readme,
            downloads: info.krate.downloads,
            dependencies,
            features,
            source: "crates.io".to_string(),
            ..RecordMetadata::default()
        };
        derive_readme_fields(&mut metadata);
        Ok(metadata)
    }
}
