//! In-process backends for unit tests of code built on the protocol.
use super::{
    GenerateRequest, Generation, InferenceBackend, InferenceSettings, ValidatedInference,
};
use crate::budget::BudgetManager;
use crate::error::InferenceError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CANNED_PAIRS: &str = "✅ Factual: demo-lib parses TOML files.\n\
❌ Counterfactual: demo-lib parses YAML files.\n\n\
✅ Factual: demo-lib has no unsafe code.\n\
❌ Counterfactual: demo-lib wraps a C library.\n\n\
✅ Factual: demo-lib supports no_std.\n\
❌ Counterfactual: demo-lib requires tokio.";

type Responder = dyn Fn(&GenerateRequest) -> Result<String, InferenceError> + Send + Sync;

/// Backend answering through a closure and recording every prompt.
pub struct FnBackend {
    respond: Box<Responder>,
    prompts: Mutex<Vec<String>>,
}

impl FnBackend {
    pub fn new(
        respond: impl Fn(&GenerateRequest) -> Result<String, InferenceError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Answers every known prompt shape with a valid response.
    pub fn canned() -> Arc<Self> {
        Self::new(|request| Ok(canned_response(&request.prompt)))
    }

    /// Fails every call.
    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(InferenceError::Backend("backend down".to_string())))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl InferenceBackend for FnBackend {
    fn name(&self) -> &str {
        "fn"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<Generation, InferenceError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.prompt.clone());
        (self.respond)(request).map(|text| Generation { text, usage: None })
    }
}

/// A valid answer for each prompt the enricher and the trust engine send.
pub fn canned_response(prompt: &str) -> String {
    let answer = if prompt.contains("\"completeness\"") {
        r#"{"completeness": 8, "clarity": 8, "examples": 7}"#
    } else if prompt.contains("positive, neutral, or negative") {
        "positive"
    } else if prompt.contains("Allowed categories") {
        "Networking"
    } else if prompt.contains("factual/counterfactual pairs") {
        CANNED_PAIRS
    } else if prompt.contains("from its README") {
        "demo-lib parses configuration files, validates them against a schema, and reports errors."
    } else {
        "The std feature enables standard library support."
    };
    answer.to_string()
}

/// Protocol over `backend` with no backoff and an unlimited budget.
pub fn protocol(backend: Arc<dyn InferenceBackend>) -> Arc<ValidatedInference> {
    let settings = InferenceSettings {
        backoff_unit: Duration::ZERO,
        ..InferenceSettings::default()
    };
    Arc::new(ValidatedInference::new(
        backend,
        Arc::new(BudgetManager::unlimited()),
        settings,
    ))
}
