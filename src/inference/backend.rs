//! Text-generation backends.
//!
//! `CommandBackend` runs a user-configured local command with the prompt on
//! stdin and reads the completion from stdout; sampling parameters travel as
//! environment variables. `HttpBackend` speaks the OpenAI-compatible
//! `/v1/completions` protocol.
use super::{GenerateRequest, Generation, InferenceBackend, TokenUsage};
use crate::config::BackendConfig;
use crate::error::InferenceError;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const TEMPERATURE_ENV: &str = "CTRUST_TEMPERATURE";
pub const MAX_TOKENS_ENV: &str = "CTRUST_MAX_TOKENS";
pub const STOP_ENV: &str = "CTRUST_STOP";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Build the configured backend, preflighting local executables.
pub fn build_backend(config: &BackendConfig, timeout: Duration) -> Result<Arc<dyn InferenceBackend>> {
    match config {
        BackendConfig::Command { command } => {
            Ok(Arc::new(CommandBackend::from_command(command, timeout)?))
        }
        BackendConfig::Http {
            url,
            model,
            api_key_env,
        } => {
            let api_key = match api_key_env {
                Some(var) => Some(
                    std::env::var(var).with_context(|| format!("read API key from ${var}"))?,
                ),
                None => None,
            };
            Ok(Arc::new(HttpBackend::new(url, model, api_key, timeout)))
        }
    }
}

/// Local command backend.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    /// Parse a shell-style command line and check the program is on PATH.
    pub fn from_command(command: &str, timeout: Duration) -> Result<Self> {
        let argv =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        let Some(program) = argv.first() else {
            return Err(anyhow!("LM command is empty"));
        };
        which::which(program).with_context(|| format!("LM command not found: {program}"))?;
        Ok(Self { argv, timeout })
    }
}

impl InferenceBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<Generation, InferenceError> {
        let start = Instant::now();
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .env(TEMPERATURE_ENV, format!("{:.3}", request.temperature))
            .env(MAX_TOKENS_ENV, request.max_tokens.to_string())
            .env(STOP_ENV, request.stop.join("\n"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| InferenceError::Backend(format!("spawn {}: {err}", self.argv[0])))?;

        // Feed and drain on helper threads so a chatty child cannot fill a pipe and stall.
        let stdin = child.stdin.take();
        let prompt = request.prompt.clone();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(prompt.as_bytes());
            }
        });
        let stdout = child.stdout.take();
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut buf);
            }
            buf
        });
        let stderr = child.stderr.take();
        let err_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf);
            }
            buf
        });

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "lm command timed out");
                    return Err(InferenceError::Timeout(self.timeout));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => return Err(InferenceError::Backend(format!("wait LM command: {err}"))),
            }
        };
        let _ = writer.join();
        let stdout = reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.prompt.len(),
            response_bytes = stdout.len(),
            "lm invoke complete"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(InferenceError::Backend(format!(
                "LM command failed with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        let text = String::from_utf8(stdout)
            .map_err(|err| InferenceError::Decode(format!("LM stdout is not UTF-8: {err}")))?;
        Ok(Generation { text, usage: None })
    }
}

/// OpenAI-compatible completions backend.
pub struct HttpBackend {
    agent: ureq::Agent,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct CompletionUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

impl HttpBackend {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            url: format!("{}/v1/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            timeout,
        }
    }
}

impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<Generation, InferenceError> {
        let start = Instant::now();
        let body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stop": request.stop,
        });
        let mut builder = self.agent.post(&self.url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let mut response = builder.send_json(&body).map_err(|err| match err {
            ureq::Error::Timeout(_) => InferenceError::Timeout(self.timeout),
            ureq::Error::StatusCode(code) => {
                InferenceError::Backend(format!("completion request returned status {code}"))
            }
            other => InferenceError::Transport(other.to_string()),
        })?;
        let parsed: CompletionResponse = response
            .body_mut()
            .read_json()
            .map_err(|err| InferenceError::Decode(err.to_string()))?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.prompt.len(),
            model = self.model.as_str(),
            "lm invoke complete"
        );

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or_else(|| InferenceError::Decode("completion has no choices".to_string()))?;
        Ok(Generation {
            text,
            usage: parsed.usage.map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        let err = CommandBackend::from_command("   ", Duration::from_secs(1))
            .expect_err("empty command");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn missing_program_fails_preflight() {
        let err = CommandBackend::from_command(
            "definitely-not-a-real-lm-binary --flag",
            Duration::from_secs(1),
        )
        .expect_err("missing program");
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn command_backend_round_trips_stdin_to_stdout() {
        let backend = CommandBackend::from_command("cat", Duration::from_secs(10)).expect("cat");
        let generation = backend
            .generate(&GenerateRequest {
                prompt: "hello backend".to_string(),
                temperature: 0.2,
                max_tokens: 16,
                stop: Vec::new(),
            })
            .expect("generate");
        assert_eq!(generation.text, "hello backend");
        assert!(generation.usage.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn command_backend_reports_failures() {
        let backend = CommandBackend::from_command("false", Duration::from_secs(10)).expect("false");
        let err = backend
            .generate(&GenerateRequest {
                prompt: String::new(),
                temperature: 0.2,
                max_tokens: 16,
                stop: Vec::new(),
            })
            .expect_err("false exits non-zero");
        assert!(matches!(err, InferenceError::Backend(_)));
    }

    #[cfg(unix)]
    #[test]
    fn command_backend_times_out() {
        let backend =
            CommandBackend::from_command("sleep 5", Duration::from_millis(100)).expect("sleep");
        let err = backend
            .generate(&GenerateRequest {
                prompt: String::new(),
                temperature: 0.2,
                max_tokens: 16,
                stop: Vec::new(),
            })
            .expect_err("sleep outlives timeout");
        assert!(matches!(err, InferenceError::Timeout(_)));
    }
}
