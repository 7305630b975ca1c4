//! Hash-sealed audit record of one trust decision.
use crate::util::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Length of the content-hash prefix embedded in execution ids.
pub const HASH_PREFIX_LEN: usize = 16;

/// Trust-boundary decision for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustVerdict {
    Allow,
    Deny,
    Defer,
    Flag,
}

impl TrustVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustVerdict::Allow => "ALLOW",
            TrustVerdict::Deny => "DENY",
            TrustVerdict::Defer => "DEFER",
            TrustVerdict::Flag => "FLAG",
        }
    }
}

impl fmt::Display for TrustVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable trace of one analysis, from input to verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustChainTrace {
    pub input: String,
    pub context_sources: Vec<String>,
    pub reasoning_steps: Vec<String>,
    pub suggestion: String,
    pub verdict: TrustVerdict,
    #[serde(default)]
    pub audit_info: BTreeMap<String, Value>,
    pub confidence: f64,
    pub execution_id: String,
    pub created_at_epoch_ms: u64,
    pub canon_version: String,
}

/// Hash prefix over the fields an execution id seals.
pub fn content_hash(
    input: &str,
    context_sources: &[String],
    reasoning_steps: &[String],
    suggestion: &str,
) -> String {
    // serde_json maps keep keys sorted, so the encoding is stable.
    let sealed = json!({
        "input": input,
        "context_sources": context_sources,
        "reasoning_steps": reasoning_steps,
        "suggestion": suggestion,
    });
    let mut hash = sha256_hex(sealed.to_string().as_bytes());
    hash.truncate(HASH_PREFIX_LEN);
    hash
}

/// `exec-<hash16>-<seq>-<epoch_ms>`.
pub fn execution_id(hash: &str, sequence: u64, epoch_ms: u64) -> String {
    format!("exec-{hash}-{sequence:06}-{epoch_ms}")
}

impl TrustChainTrace {
    pub fn content_hash(&self) -> String {
        content_hash(
            &self.input,
            &self.context_sources,
            &self.reasoning_steps,
            &self.suggestion,
        )
    }

    /// Hash segment of the execution id, if the id is well formed.
    pub fn embedded_hash(&self) -> Option<&str> {
        let rest = self.execution_id.strip_prefix("exec-")?;
        let hash = rest.split('-').next()?;
        (hash.len() == HASH_PREFIX_LEN).then_some(hash)
    }

    /// Recompute the content hash and compare it to the embedded one.
    pub fn verify_integrity(&self) -> bool {
        self.embedded_hash() == Some(self.content_hash().as_str())
    }

    /// One line of the audit log.
    pub fn to_audit_log(&self) -> Value {
        json!({
            "execution_id": self.execution_id,
            "timestamp": self.created_at_epoch_ms,
            "chain": self,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_trace() -> TrustChainTrace {
        let input = "demo-lib".to_string();
        let context_sources = vec!["crates.io:v1.3.0".to_string(), "docs.rs:v1.3.0".to_string()];
        let reasoning_steps = vec!["Basic metadata extracted: 9 fields".to_string()];
        let suggestion = "MEDIUM CONFIDENCE".to_string();
        let hash = content_hash(&input, &context_sources, &reasoning_steps, &suggestion);
        TrustChainTrace {
            execution_id: execution_id(&hash, 7, 1_700_000_000_000),
            input,
            context_sources,
            reasoning_steps,
            suggestion,
            verdict: TrustVerdict::Allow,
            audit_info: BTreeMap::new(),
            confidence: 0.79,
            created_at_epoch_ms: 1_700_000_000_000,
            canon_version: "1.3.0".to_string(),
        }
    }

    #[test]
    fn execution_id_embeds_hash_and_sequence() {
        let trace = sealed_trace();
        assert!(trace.execution_id.starts_with("exec-"));
        assert!(trace.execution_id.contains("-000007-1700000000000"));
        assert_eq!(trace.embedded_hash().map(str::len), Some(HASH_PREFIX_LEN));
        assert!(trace.verify_integrity());
    }

    #[test]
    fn mutating_sealed_fields_breaks_integrity() {
        let mut trace = sealed_trace();
        trace.input = "other-lib".to_string();
        assert!(!trace.verify_integrity());

        let mut trace = sealed_trace();
        trace.context_sources.pop();
        assert!(!trace.verify_integrity());

        let mut trace = sealed_trace();
        trace.reasoning_steps.push("extra step".to_string());
        assert!(!trace.verify_integrity());

        let mut trace = sealed_trace();
        trace.suggestion.push('!');
        assert!(!trace.verify_integrity());
    }

    #[test]
    fn unsealed_fields_do_not_affect_integrity() {
        let mut trace = sealed_trace();
        trace.confidence = 0.1;
        trace.verdict = TrustVerdict::Flag;
        assert!(trace.verify_integrity());
    }

    #[test]
    fn malformed_execution_id_fails_verification() {
        let mut trace = sealed_trace();
        trace.execution_id = "exec-short-1-2".to_string();
        assert!(!trace.verify_integrity());
        trace.execution_id = "garbage".to_string();
        assert!(!trace.verify_integrity());
    }

    #[test]
    fn audit_log_line_carries_uppercase_verdict() {
        let trace = sealed_trace();
        let line = trace.to_audit_log();
        assert_eq!(line["execution_id"], trace.execution_id.as_str());
        assert_eq!(line["chain"]["verdict"], "ALLOW");
        let parsed: TrustChainTrace =
            serde_json::from_value(line["chain"].clone()).expect("parse chain");
        assert_eq!(parsed, trace);
    }
}
