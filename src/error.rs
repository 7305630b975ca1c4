//! Typed failure taxonomy for the trust engine and its collaborators.
//!
//! Recoverable conditions (inference failures, validation exhaustion, budget
//! exhaustion) are not errors at the record level; they degrade values or stop
//! issuing work. The variants here are the ones callers must branch on.
use std::time::Duration;
use thiserror::Error;

/// Failures that abort the analysis of a single record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrustError {
    #[error("invalid input {input:?}: {reason}")]
    InvalidInput { input: String, reason: String },
    #[error("insufficient canon: {found} valid source(s), at least {required} required")]
    InsufficientCanon { found: usize, required: usize },
    #[error("integrity violation for trace {execution_id}")]
    IntegrityViolation { execution_id: String },
}

/// Failures of a single backend call.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("inference backend failed: {0}")]
    Backend(String),
    #[error("inference transport failed: {0}")]
    Transport(String),
    #[error("decode inference response: {0}")]
    Decode(String),
}

/// Failures of the metadata, stats, and scraping collaborators.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("record {0} not found")]
    NotFound(String),
    #[error("source transport failed: {0}")]
    Transport(String),
    #[error("decode source response: {0}")]
    Decode(String),
}
