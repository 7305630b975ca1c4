//! Registry of authority-ranked sources consulted before any trust decision.
//!
//! Entries expire lazily: an expired entry is evicted the first time it is
//! looked up, never by a background sweep.
use crate::error::TrustError;
use crate::util::{now_epoch_ms, sha256_hex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Default minimum authority for a source to count as valid context.
pub const DEFAULT_MIN_AUTHORITY: u8 = 5;
/// Minimum number of valid sources required before reasoning may start.
pub const MIN_CANON_SOURCES: usize = 2;
/// Version stamped onto entries and traces.
pub const CANON_VERSION: &str = "1.3.0";

/// A registered source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonEntry {
    pub source: String,
    pub version: String,
    /// 1-10, 10 = highest trust.
    pub authority_level: u8,
    pub content_hash: String,
    pub last_validated_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_epoch_ms: Option<u64>,
}

impl CanonEntry {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        match self.expiry_epoch_ms {
            Some(expiry) => now_ms < expiry,
            None => true,
        }
    }
}

/// Seed for a registry entry, as it appears in the pipeline config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonSeed {
    pub key: String,
    pub source: String,
    pub content: String,
    pub authority_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// Sources the original registry was seeded with.
pub fn default_canon_seeds() -> Vec<CanonSeed> {
    [
        ("crates.io", "https://crates.io", "Official Rust package registry", 9),
        ("docs.rs", "https://docs.rs", "Official documentation hosting", 8),
        ("github.com", "https://github.com", "Primary source code hosting", 7),
        (
            "community",
            "reddit.com, rust-lang.org",
            "Community discussion forums",
            5,
        ),
    ]
    .into_iter()
    .map(|(key, source, content, authority_level)| CanonSeed {
        key: key.to_string(),
        source: source.to_string(),
        content: content.to_string(),
        authority_level,
        ttl_secs: None,
    })
    .collect()
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: BTreeMap<String, CanonEntry>,
    authority_chain: Vec<String>,
}

/// Thread-safe canon registry shared by all workers of a run.
#[derive(Debug)]
pub struct CanonRegistry {
    version: String,
    state: Mutex<RegistryState>,
}

impl Default for CanonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonRegistry {
    pub fn new() -> Self {
        Self {
            version: CANON_VERSION.to_string(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Build a registry from config seeds.
    pub fn from_seeds(seeds: &[CanonSeed]) -> Self {
        let registry = Self::new();
        for seed in seeds {
            match seed.ttl_secs {
                Some(ttl) => registry.register_with_ttl(
                    &seed.key,
                    &seed.source,
                    &seed.content,
                    seed.authority_level,
                    ttl.saturating_mul(1000),
                ),
                None => registry.register(
                    &seed.key,
                    &seed.source,
                    &seed.content,
                    seed.authority_level,
                ),
            }
        }
        registry
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A poisoned registry still holds consistent entries; each mutation is a single insert/remove.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register or overwrite an entry. Authority is clamped to 1-10.
    pub fn register(&self, key: &str, source: &str, content: &str, authority_level: u8) {
        self.insert(key, source, content, authority_level, None);
    }

    /// Register an entry that expires `ttl_ms` after registration.
    pub fn register_with_ttl(
        &self,
        key: &str,
        source: &str,
        content: &str,
        authority_level: u8,
        ttl_ms: u64,
    ) {
        let expiry = now_epoch_ms().saturating_add(ttl_ms);
        self.insert(key, source, content, authority_level, Some(expiry));
    }

    /// Insert a fully-formed entry, e.g. one reloaded from an audit record.
    pub fn register_entry(&self, key: &str, entry: CanonEntry) {
        let mut state = self.lock();
        state.authority_chain.push(format!(
            "{}:{}:{}",
            entry.last_validated_epoch_ms, key, entry.authority_level
        ));
        state.entries.insert(key.to_string(), entry);
    }

    fn insert(
        &self,
        key: &str,
        source: &str,
        content: &str,
        authority_level: u8,
        expiry_epoch_ms: Option<u64>,
    ) {
        let authority_level = authority_level.clamp(1, 10);
        let entry = CanonEntry {
            source: source.to_string(),
            version: self.version.clone(),
            authority_level,
            content_hash: sha256_hex(content.as_bytes()),
            last_validated_epoch_ms: now_epoch_ms(),
            expiry_epoch_ms,
        };
        self.register_entry(key, entry);
        tracing::info!(key, authority_level, "canon registered");
    }

    /// Look up an entry, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<CanonEntry> {
        let now = now_epoch_ms();
        let mut state = self.lock();
        let entry = state.entries.get(key)?;
        if entry.is_valid_at(now) {
            return Some(entry.clone());
        }
        tracing::warn!(key, "canon expired");
        state.entries.remove(key);
        None
    }

    /// Keys of valid entries meeting `min_authority`, highest authority first,
    /// formatted as `key:v<version>`.
    pub fn valid_sources(&self, min_authority: u8) -> Result<Vec<String>, TrustError> {
        let now = now_epoch_ms();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_valid_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            tracing::warn!(key = key.as_str(), "canon expired");
            state.entries.remove(key);
        }

        let mut qualified: Vec<(&String, &CanonEntry)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.authority_level >= min_authority)
            .collect();
        qualified.sort_by(|a, b| {
            b.1.authority_level
                .cmp(&a.1.authority_level)
                .then_with(|| a.0.cmp(b.0))
        });
        let sources: Vec<String> = qualified
            .into_iter()
            .map(|(key, entry)| format!("{key}:v{}", entry.version))
            .collect();

        if sources.len() < MIN_CANON_SOURCES {
            return Err(TrustError::InsufficientCanon {
                found: sources.len(),
                required: MIN_CANON_SOURCES,
            });
        }
        Ok(sources)
    }

    /// Append-only registration log (`epoch_ms:key:authority`).
    pub fn audit_trail(&self) -> Vec<String> {
        self.lock().authority_chain.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
