//! Validated, retry-capable protocol for invoking a text-generation backend.
//!
//! `invoke` fits the prompt to the configured token margin and makes exactly
//! one backend call. `invoke_with_retry` wraps it in an explicit attempt loop
//! with temperature escalation, linear backoff, and prompt simplification.
//! Exhausting the attempts is not an error: the last obtained output is
//! returned with `validated = false`.
pub mod backend;
pub mod log;
pub mod prompt;
#[cfg(test)]
pub mod testing;
pub mod validators;

use crate::budget::BudgetManager;
use crate::error::InferenceError;
pub use self::log::{InferenceLog, InferenceOutcome, InferenceTask};
use self::log::InferenceLogBuilder;
pub use prompt::Prompt;
use prompt::{clean_output, estimate_tokens, truncate_content, truncate_tokens};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

/// Token counts reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Backend-reported usage; estimated from text when absent.
    pub usage: Option<TokenUsage>,
}

/// A text-generation backend. Latency and failure modes are opaque beyond
/// the error variants.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerateRequest) -> Result<Generation, InferenceError>;
}

/// Tuning for the protocol, resolved from config.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    /// Prompts estimated above this many tokens are truncated.
    pub prompt_token_margin: usize,
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `(2 + n)` units.
    pub backoff_unit: Duration,
    pub price_per_1k_prompt: f64,
    pub price_per_1k_completion: f64,
    pub stop: Vec<String>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            prompt_token_margin: 3000,
            max_attempts: 4,
            backoff_unit: Duration::from_secs(1),
            price_per_1k_prompt: 0.0,
            price_per_1k_completion: 0.0,
            stop: prompt::default_stop_sequences(),
        }
    }
}

/// Identifies a call for logging.
#[derive(Debug, Clone, Copy)]
pub struct InferenceCall<'a> {
    pub task: InferenceTask,
    pub subject: &'a str,
}

/// Result of `invoke_with_retry`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// Last output obtained, validated or not; `None` only when every call
    /// errored.
    pub text: Option<String>,
    pub attempts: u32,
    pub validated: bool,
}

impl RetryOutcome {
    /// The output only if it passed validation.
    pub fn validated_text(&self) -> Option<&str> {
        if self.validated {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// One billed backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub cost: f64,
}

pub struct ValidatedInference {
    backend: Arc<dyn InferenceBackend>,
    budget: Arc<BudgetManager>,
    settings: InferenceSettings,
    log: Option<Arc<InferenceLog>>,
}

impl ValidatedInference {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        budget: Arc<BudgetManager>,
        settings: InferenceSettings,
    ) -> Self {
        Self {
            backend,
            budget,
            settings,
            log: None,
        }
    }

    pub fn with_log(mut self, log: Arc<InferenceLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    pub fn budget(&self) -> &BudgetManager {
        &self.budget
    }

    /// Fit the prompt to the token margin and call the backend once.
    /// Successful calls are billed before the cleaned text is returned.
    pub fn invoke(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<Invocation, InferenceError> {
        let prompt = self.fit_prompt(prompt);
        let request = GenerateRequest {
            prompt,
            temperature,
            max_tokens,
            stop: self.settings.stop.clone(),
        };
        let generation = self.backend.generate(&request)?;
        let raw = cut_at_stop(&generation.text, &self.settings.stop);
        let usage = generation.usage.unwrap_or(TokenUsage {
            prompt_tokens: estimate_tokens(&request.prompt),
            completion_tokens: estimate_tokens(raw),
        });
        let cost = usage.prompt_tokens as f64 / 1000.0 * self.settings.price_per_1k_prompt
            + usage.completion_tokens as f64 / 1000.0 * self.settings.price_per_1k_completion;
        self.budget.record_cost(cost);
        Ok(Invocation {
            text: clean_output(raw),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost,
        })
    }

    fn fit_prompt(&self, prompt: &str) -> String {
        let tokens = estimate_tokens(prompt);
        if tokens <= self.settings.prompt_token_margin {
            return prompt.to_string();
        }
        let limit = self.settings.prompt_token_margin.saturating_sub(100);
        tracing::warn!(tokens, limit, "prompt too long, truncating");
        let truncated = truncate_content(prompt, limit);
        if truncated.is_empty() {
            // A single oversized paragraph still has to fit.
            return truncate_tokens(prompt, limit);
        }
        truncated
    }

    /// Invoke until an output validates or `max_attempts` calls were made.
    pub fn invoke_with_retry(
        &self,
        call: InferenceCall<'_>,
        prompt: &Prompt,
        validator: &dyn Fn(&str) -> bool,
        base_temperature: f64,
        max_tokens: u32,
    ) -> RetryOutcome {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut current = prompt.clone();
        let mut last_text: Option<String> = None;
        let mut entry =
            InferenceLogBuilder::new(call.task, call.subject).with_prompt_preview(&prompt.render());

        for attempt in 0..max_attempts {
            let temperature = base_temperature * (1.0 + 0.2 * f64::from(attempt));
            match self.invoke(&current.render(), temperature, max_tokens) {
                Ok(billed) => {
                    entry.record_call(billed.prompt_tokens, billed.completion_tokens, billed.cost);
                    if !billed.text.is_empty() && validator(&billed.text) {
                        self.write_log(entry.finish(attempt + 1, InferenceOutcome::Validated));
                        return RetryOutcome {
                            text: Some(billed.text),
                            attempts: attempt + 1,
                            validated: true,
                        };
                    }
                    last_text = Some(billed.text);
                    tracing::debug!(
                        task = %call.task,
                        subject = call.subject,
                        attempt = attempt + 1,
                        max_attempts,
                        temperature,
                        "validation failed"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        task = %call.task,
                        subject = call.subject,
                        attempt = attempt + 1,
                        %err,
                        "generation error"
                    );
                    entry.record_error(err.to_string());
                }
            }

            if attempt + 1 == max_attempts {
                break;
            }
            if attempt >= 2 {
                current = current.simplified();
            }
            thread::sleep(self.settings.backoff_unit * (2 + attempt));
        }

        let outcome = if last_text.is_some() {
            InferenceOutcome::Unvalidated
        } else {
            InferenceOutcome::Failed
        };
        tracing::debug!(
            task = %call.task,
            subject = call.subject,
            max_attempts,
            "all validation attempts failed, using last available result"
        );
        self.write_log(entry.finish(max_attempts, outcome));
        RetryOutcome {
            text: last_text,
            attempts: max_attempts,
            validated: false,
        }
    }

    fn write_log(&self, entry: self::log::InferenceLogEntry) {
        if let Some(log) = &self.log {
            if let Err(err) = log.append(&entry) {
                tracing::warn!(%err, "append inference log");
            }
        }
    }
}

fn cut_at_stop<'a>(text: &'a str, stop: &[String]) -> &'a str {
    let cut = stop
        .iter()
        .filter(|marker| !marker.is_empty())
        .filter_map(|marker| text.find(marker.as_str()))
        .min()
        .unwrap_or(text.len());
    &text[..cut]
}

#[cfg(test)]
#[path = "inference_tests.rs"]
mod tests;
