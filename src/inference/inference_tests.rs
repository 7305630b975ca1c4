use super::*;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Backend replaying scripted responses and recording every request.
struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<String, InferenceError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<Result<String, InferenceError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<Generation, InferenceError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()));
        next.map(|text| Generation { text, usage: None })
    }
}

fn settings() -> InferenceSettings {
    InferenceSettings {
        backoff_unit: Duration::ZERO,
        price_per_1k_prompt: 1.0,
        price_per_1k_completion: 2.0,
        ..InferenceSettings::default()
    }
}

fn protocol(backend: Arc<ScriptedBackend>) -> (ValidatedInference, Arc<BudgetManager>) {
    let budget = Arc::new(BudgetManager::unlimited());
    let inference = ValidatedInference::new(backend, budget.clone(), settings());
    (inference, budget)
}

fn call() -> InferenceCall<'static> {
    InferenceCall {
        task: InferenceTask::Classification,
        subject: "demo-lib",
    }
}

fn classify_prompt() -> Prompt {
    Prompt::new("You are a Rust expert classifying crates.", "Crate: demo-lib")
        .with_example("Crate: tokio\nCategory: Networking")
}

#[test]
fn never_validating_makes_exactly_max_attempts_calls() {
    let backend = ScriptedBackend::new(vec![
        Ok("first".to_string()),
        Ok("second".to_string()),
        Ok("third".to_string()),
        Ok("fourth".to_string()),
        Ok("unused".to_string()),
    ]);
    let (inference, _) = protocol(backend.clone());

    let outcome = inference.invoke_with_retry(call(), &classify_prompt(), &|_| false, 0.2, 50);

    assert_eq!(backend.requests().len(), 4);
    assert_eq!(outcome.attempts, 4);
    assert!(!outcome.validated);
    assert_eq!(outcome.text.as_deref(), Some("fourth"));
    assert_eq!(outcome.validated_text(), None);
}

#[test]
fn first_validating_output_is_returned_with_escalated_temperature() {
    let backend = ScriptedBackend::new(vec![
        Ok("Category: maybe networking".to_string()),
        Ok("Networking".to_string()),
    ]);
    let (inference, _) = protocol(backend.clone());

    let outcome =
        inference.invoke_with_retry(call(), &classify_prompt(), &validators::classification, 0.2, 50);

    assert!(outcome.validated);
    assert_eq!(outcome.validated_text(), Some("Networking"));
    assert_eq!(outcome.attempts, 2);
    let temps: Vec<f64> = backend.requests().iter().map(|r| r.temperature).collect();
    assert!((temps[0] - 0.2).abs() < 1e-9);
    assert!((temps[1] - 0.24).abs() < 1e-9);
}

#[test]
fn prompt_is_simplified_after_third_attempt() {
    let backend = ScriptedBackend::new(Vec::new());
    let (inference, _) = protocol(backend.clone());

    let outcome = inference.invoke_with_retry(call(), &classify_prompt(), &|_| false, 0.2, 50);

    assert_eq!(outcome.text.as_deref(), Some(""));
    let prompts: Vec<String> = backend.requests().into_iter().map(|r| r.prompt).collect();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[..3].iter().all(|p| p.contains("# Example 1")));
    assert!(!prompts[3].contains("# Example 1"));
    assert!(prompts[3].contains("Be concise."));
    assert!(prompts[3].contains("Crate: demo-lib"));
}

#[test]
fn final_empty_output_replaces_earlier_invalid_one() {
    let backend = ScriptedBackend::new(vec![
        Ok("Category: maybe networking".to_string()),
        Ok("still not a label".to_string()),
        Ok("nearly".to_string()),
        Ok(String::new()),
    ]);
    let (inference, _) = protocol(backend);

    let outcome =
        inference.invoke_with_retry(call(), &classify_prompt(), &validators::classification, 0.2, 50);

    assert!(!outcome.validated);
    assert_eq!(outcome.text.as_deref(), Some(""));
}

#[test]
fn errors_keep_last_output_and_are_not_billed() {
    let backend = ScriptedBackend::new(vec![
        Ok("partial answer".to_string()),
        Err(InferenceError::Timeout(Duration::from_secs(1))),
        Err(InferenceError::Backend("boom".to_string())),
        Err(InferenceError::Transport("reset".to_string())),
    ]);
    let (inference, budget) = protocol(backend);

    let outcome = inference.invoke_with_retry(call(), &classify_prompt(), &|_| false, 0.2, 50);

    assert_eq!(outcome.text.as_deref(), Some("partial answer"));
    assert!(!outcome.validated);
    assert_eq!(budget.calls(), 1);
    assert!(budget.total() > 0.0);
}

#[test]
fn successful_calls_are_billed_per_thousand_tokens() {
    let backend = ScriptedBackend::new(vec![Ok("one two".to_string())]);
    let (inference, budget) = protocol(backend);

    let invocation = inference.invoke("a b c d", 0.2, 10).expect("invoke");

    assert_eq!(invocation.text, "one two");
    assert_eq!(invocation.prompt_tokens, 4);
    assert_eq!(invocation.completion_tokens, 2);
    // 4 prompt tokens at 1.0 per 1k plus 2 completion tokens at 2.0 per 1k.
    assert!((budget.total() - 0.008).abs() < 1e-12);
}

#[test]
fn oversized_prompts_are_truncated_below_margin() {
    let backend = ScriptedBackend::new(vec![Ok("ok".to_string())]);
    let budget = Arc::new(BudgetManager::unlimited());
    let inference = ValidatedInference::new(
        backend.clone(),
        budget,
        InferenceSettings {
            prompt_token_margin: 150,
            ..settings()
        },
    );
    let paragraph = "word ".repeat(40);
    let prompt = vec![paragraph.trim(); 10].join("\n\n");

    inference.invoke(&prompt, 0.2, 10).expect("invoke");

    let sent = &backend.requests()[0].prompt;
    assert!(estimate_tokens(sent) <= 50);
    assert!(!sent.is_empty());
}

#[test]
fn output_is_cut_at_stop_sequences() {
    let backend = ScriptedBackend::new(vec![Ok("Networking\n<|user|>ignored".to_string())]);
    let (inference, _) = protocol(backend.clone());

    let text = inference.invoke("Classify", 0.2, 10).expect("invoke").text;

    assert_eq!(text, "Networking");
    assert_eq!(backend.requests()[0].stop.len(), 3);
}

#[test]
fn retry_outcomes_are_logged() {
    let dir = tempfile::tempdir().expect("temp dir");
    let inference_log = Arc::new(InferenceLog::new(dir.path()));
    let backend = ScriptedBackend::new(vec![Ok("Serialization".to_string())]);
    let inference = ValidatedInference::new(
        backend,
        Arc::new(BudgetManager::unlimited()),
        settings(),
    )
    .with_log(inference_log.clone());

    inference.invoke_with_retry(call(), &classify_prompt(), &validators::classification, 0.2, 50);

    let entries = super::log::load_inference_log(inference_log.path()).expect("load log");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, InferenceOutcome::Validated);
    assert_eq!(entries[0].attempts, 1);
    assert_eq!(entries[0].subject, "demo-lib");
}
