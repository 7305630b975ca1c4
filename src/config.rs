//! Run configuration.
//!
//! A single JSON file holds pipeline, inference, and source settings plus the
//! canon seeds. Every section has defaults, so `{"schema_version": 1}` is a
//! complete config.
use crate::canon::{default_canon_seeds, CanonSeed, DEFAULT_MIN_AUTHORITY};
use crate::inference::prompt::default_stop_sequences;
use crate::inference::InferenceSettings;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// Environment fallback for the local model command.
pub const LM_COMMAND_ENV: &str = "CTRUST_LM_COMMAND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: u32,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default = "default_canon_seeds")]
    pub canon: Vec<CanonSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub workers: usize,
    /// Spend ceiling; `None` means unlimited.
    pub budget: Option<f64>,
    /// Expected spend of one record, checked against the remaining budget
    /// before the record is started.
    pub estimated_record_cost: f64,
    /// Resident memory threshold checked between batches.
    pub memory_limit_mb: u64,
    pub memory_pause_ms: u64,
    pub memory_max_pauses: u32,
    /// Run the readme/feature/classification/pairs pass.
    pub enrichment: bool,
    pub min_authority: u8,
    pub output_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            workers: 4,
            budget: None,
            estimated_record_cost: 0.0,
            memory_limit_mb: 4096,
            memory_pause_ms: 2000,
            memory_max_pauses: 3,
            enrichment: true,
            min_authority: DEFAULT_MIN_AUTHORITY,
            output_dir: None,
        }
    }
}

/// How to reach the text-generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum BackendConfig {
    /// Local command: prompt on stdin, completion on stdout.
    Command { command: String },
    /// OpenAI-compatible completions endpoint.
    Http {
        url: String,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Command {
            command: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub backend: BackendConfig,
    pub request_timeout_secs: u64,
    pub prompt_token_margin: usize,
    pub max_attempts: u32,
    pub backoff_unit_ms: u64,
    pub price_per_1k_prompt: f64,
    pub price_per_1k_completion: f64,
    pub stop: Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            request_timeout_secs: 120,
            prompt_token_margin: 3000,
            max_attempts: 4,
            backoff_unit_ms: 1000,
            price_per_1k_prompt: 0.0,
            price_per_1k_completion: 0.0,
            stop: default_stop_sequences(),
        }
    }
}

impl InferenceConfig {
    pub fn settings(&self) -> InferenceSettings {
        InferenceSettings {
            prompt_token_margin: self.prompt_token_margin,
            max_attempts: self.max_attempts,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            price_per_1k_prompt: self.price_per_1k_prompt,
            price_per_1k_completion: self.price_per_1k_completion,
            stop: self.stop.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    pub request_timeout_secs: u64,
    /// Serve metadata, stats, and scrapes from `<dir>/<name>.json` instead
    /// of the network.
    pub fixtures_dir: Option<PathBuf>,
    pub scraping: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            fixtures_dir: None,
            scraping: true,
        }
    }
}

pub fn default_config() -> Config {
    Config {
        schema_version: CONFIG_SCHEMA_VERSION,
        pipeline: PipelineConfig::default(),
        inference: InferenceConfig::default(),
        sources: SourcesConfig::default(),
        canon: default_canon_seeds(),
    }
}

/// Pretty JSON of the default config, for `ctrust config`.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: Config = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    let pipeline = &config.pipeline;
    if pipeline.batch_size == 0 {
        return Err(anyhow!("pipeline.batch_size must be at least 1"));
    }
    if pipeline.workers == 0 {
        return Err(anyhow!("pipeline.workers must be at least 1"));
    }
    if let Some(budget) = pipeline.budget {
        if !budget.is_finite() || budget <= 0.0 {
            return Err(anyhow!("pipeline.budget must be positive (got {budget})"));
        }
    }
    if !pipeline.estimated_record_cost.is_finite() || pipeline.estimated_record_cost < 0.0 {
        return Err(anyhow!("pipeline.estimated_record_cost must be non-negative"));
    }
    if !(1..=10).contains(&pipeline.min_authority) {
        return Err(anyhow!(
            "pipeline.min_authority must be 1-10 (got {})",
            pipeline.min_authority
        ));
    }

    let inference = &config.inference;
    if inference.max_attempts == 0 {
        return Err(anyhow!("inference.max_attempts must be at least 1"));
    }
    if inference.prompt_token_margin <= 100 {
        return Err(anyhow!("inference.prompt_token_margin must exceed 100"));
    }
    for (label, price) in [
        ("price_per_1k_prompt", inference.price_per_1k_prompt),
        ("price_per_1k_completion", inference.price_per_1k_completion),
    ] {
        if !price.is_finite() || price < 0.0 {
            return Err(anyhow!("inference.{label} must be non-negative"));
        }
    }
    if let BackendConfig::Http { url, model, .. } = &inference.backend {
        if url.trim().is_empty() || model.trim().is_empty() {
            return Err(anyhow!("inference.backend http requires url and model"));
        }
    }

    let mut keys = BTreeSet::new();
    for seed in &config.canon {
        if seed.key.trim().is_empty() {
            return Err(anyhow!("canon seed keys must be non-empty"));
        }
        if !(1..=10).contains(&seed.authority_level) {
            return Err(anyhow!(
                "canon seed {:?} authority_level must be 1-10 (got {})",
                seed.key,
                seed.authority_level
            ));
        }
        if !keys.insert(seed.key.as_str()) {
            return Err(anyhow!("duplicate canon seed {:?}", seed.key));
        }
    }
    Ok(())
}

/// Resolve the local model command: explicit flag, then config, then
/// `CTRUST_LM_COMMAND`. An HTTP backend in config is left alone unless a
/// flag overrides it.
pub fn resolve_lm_command(config: &mut Config, explicit: Option<&str>) -> Result<()> {
    if let Some(command) = explicit.filter(|command| !command.trim().is_empty()) {
        config.inference.backend = BackendConfig::Command {
            command: command.to_string(),
        };
        return Ok(());
    }
    match &config.inference.backend {
        BackendConfig::Http { .. } => Ok(()),
        BackendConfig::Command { command } if !command.trim().is_empty() => Ok(()),
        BackendConfig::Command { .. } => {
            let command = std::env::var(LM_COMMAND_ENV)
                .ok()
                .filter(|command| !command.trim().is_empty())
                .ok_or_else(|| {
                    anyhow!(
                        "no model command configured; pass --lm, set inference.backend in the config, or set {LM_COMMAND_ENV}"
                    )
                })?;
            config.inference.backend = BackendConfig::Command { command };
            Ok(())
        }
    }
}

/// Output root used when neither the flag nor the config names one.
pub fn default_output_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("ctrust").join("output"))
        .unwrap_or_else(|| PathBuf::from("output"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
