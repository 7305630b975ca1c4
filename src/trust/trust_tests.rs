use super::*;
use crate::canon::default_canon_seeds;
use crate::inference::testing::{protocol, FnBackend};
use crate::model::DependencyRef;

fn demo_metadata() -> RecordMetadata {
    RecordMetadata {
        name: "demo-lib".to_string(),
        version: "1.2.0".to_string(),
        description: "Parse and validate demo configuration files with helpful errors."
            .to_string(),
        repository: "https://github.com/demo/demo-lib".to_string(),
        keywords: vec!["config".to_string(), "parser".to_string(), "toml".to_string()],
        categories: vec!["parsing".to_string()],
        readme: "Intro. ".repeat(200),
        downloads: 150_000,
        dependencies: vec![DependencyRef {
            crate_id: "serde".to_string(),
            kind: "normal".to_string(),
            req: Some("^1".to_string()),
        }],
        features: BTreeMap::from([("std".to_string(), Vec::new())]),
        code_snippets: vec!["demo_lib::parse(\"a = 1\")".to_string()],
        ..RecordMetadata::default()
    }
}

fn demo_stats() -> RepoStats {
    RepoStats {
        stars: 450,
        forks: 12,
        updated_at_epoch_ms: Some(now_epoch_ms()),
        ..RepoStats::default()
    }
}

fn engine(backend: Arc<FnBackend>) -> TrustDecisionEngine {
    let canon = Arc::new(CanonRegistry::from_seeds(&default_canon_seeds()));
    TrustDecisionEngine::new(canon, protocol(backend))
}

fn input<'a>(
    identifier: &'a str,
    metadata: &'a RecordMetadata,
    stats: Option<&'a RepoStats>,
) -> TrustInput<'a> {
    TrustInput {
        identifier,
        metadata,
        repo_stats: stats,
        known_use_case: None,
    }
}

#[test]
fn canonicalize_normalizes_and_rejects() {
    assert_eq!(canonicalize("  Demo-Lib ").expect("valid"), "demo-lib");
    assert_eq!(canonicalize("serde_json").expect("valid"), "serde_json");
    for bad in ["", "   ", "-lead", "trail-", "has space", "semi;colon", "ünïcode"] {
        assert!(
            matches!(canonicalize(bad), Err(TrustError::InvalidInput { .. })),
            "{bad:?} should be rejected"
        );
    }
    assert!(canonicalize(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    assert!(canonicalize(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
}

#[test]
fn healthy_record_is_allowed_with_verified_trace() {
    let engine = engine(FnBackend::canned());
    let metadata = demo_metadata();
    let stats = demo_stats();

    let report = engine
        .analyze(&input("Demo-Lib", &metadata, Some(&stats)))
        .expect("analysis");

    let trace = &report.trace;
    assert_eq!(trace.input, "demo-lib");
    assert_eq!(trace.verdict, TrustVerdict::Allow);
    assert!(trace.verify_integrity());
    assert_eq!(trace.context_sources.len(), 4);
    assert_eq!(trace.context_sources[0], "crates.io:v1.3.0");
    assert_eq!(trace.reasoning_steps.len(), 5);
    assert!(trace.reasoning_steps[1].starts_with("Documentation analyzed"));
    assert_eq!(trace.reasoning_steps[2], "Community sentiment: positive");
    assert_eq!(trace.reasoning_steps[3], "Ecosystem position: Networking (stable)");
    assert!(trace.reasoning_steps[4].starts_with("Synthesized quality score"));
    assert!(report.quality_score >= 6.0);
    assert!((0.0..=1.0).contains(&trace.confidence));
    assert_eq!(trace.canon_version, "1.3.0");
    assert_eq!(trace.audit_info["degraded_steps"], serde_json::json!([]));

    let summary = report.summary();
    assert_eq!(summary.verdict, TrustVerdict::Allow);
    assert_eq!(summary.criteria.len(), 4);
    assert_eq!(summary.execution_id, trace.execution_id);
}

#[test]
fn failing_backend_degrades_and_flags() {
    let engine = engine(FnBackend::failing());
    let metadata = demo_metadata();

    let report = engine
        .analyze(&input("demo-lib", &metadata, None))
        .expect("degraded analysis still completes");

    assert_eq!(report.trace.verdict, TrustVerdict::Flag);
    assert!(report.trace.verify_integrity());
    let failed: Vec<&String> = report
        .trace
        .reasoning_steps
        .iter()
        .filter(|step| step.contains("failed, using fallback values"))
        .collect();
    assert_eq!(failed.len(), 3);
    assert_eq!(
        report.trace.audit_info["degraded_steps"],
        serde_json::json!(["documentation", "sentiment", "ecosystem"])
    );
}

#[test]
fn unknown_classification_is_an_answer_not_a_failure() {
    let backend = FnBackend::new(|request| {
        if request.prompt.contains("Allowed categories") {
            Ok("Unknown".to_string())
        } else {
            Ok(crate::inference::testing::canned_response(&request.prompt))
        }
    });
    let engine = engine(backend);
    let metadata = demo_metadata();
    let stats = demo_stats();

    let report = engine
        .analyze(&input("demo-lib", &metadata, Some(&stats)))
        .expect("analysis");

    assert_eq!(
        report.trace.reasoning_steps[3],
        "Ecosystem position: Unknown (stable)"
    );
    assert_eq!(report.trace.audit_info["degraded_steps"], serde_json::json!([]));
    assert_eq!(report.trace.verdict, TrustVerdict::Allow);
}

#[test]
fn known_use_case_skips_ecosystem_call() {
    let backend = FnBackend::canned();
    let engine = engine(backend.clone());
    let metadata = demo_metadata();
    let request = TrustInput {
        known_use_case: Some(UseCase::Serialization),
        ..input("demo-lib", &metadata, None)
    };

    let report = engine.analyze(&request).expect("analysis");

    assert_eq!(
        report.trace.reasoning_steps[3],
        "Ecosystem position: Serialization (stable)"
    );
    assert!(backend
        .prompts()
        .iter()
        .all(|prompt| !prompt.contains("Allowed categories")));
}

#[test]
fn invalid_input_aborts_without_trace() {
    let engine = engine(FnBackend::canned());
    let metadata = demo_metadata();

    let err = engine
        .analyze(&input("not valid!", &metadata, None))
        .expect_err("invalid input");

    assert!(matches!(err, TrustError::InvalidInput { .. }));
    assert_eq!(engine.audit_summary().total_executions, 0);
    assert!(engine.drain_execution_log().is_empty());
}

#[test]
fn insufficient_canon_aborts_before_reasoning() {
    let backend = FnBackend::canned();
    let canon = Arc::new(CanonRegistry::new());
    canon.register("crates.io", "https://crates.io", "registry", 9);
    canon.register("blog", "https://example.org", "low authority", 2);
    let engine = TrustDecisionEngine::new(canon, protocol(backend.clone()));
    let metadata = demo_metadata();

    let err = engine
        .analyze(&input("demo-lib", &metadata, None))
        .expect_err("insufficient canon");

    assert_eq!(
        err,
        TrustError::InsufficientCanon {
            found: 1,
            required: 2
        }
    );
    assert!(backend.prompts().is_empty());
}

#[test]
fn tampered_trace_is_refused_and_not_logged() {
    let engine = engine(FnBackend::canned());
    let metadata = demo_metadata();
    let mut trace = engine
        .analyze(&input("demo-lib", &metadata, None))
        .expect("analysis")
        .trace;
    let _ = engine.drain_execution_log();

    trace.reasoning_steps.push("Injected step".to_string());
    let err = engine.seal(trace.clone()).expect_err("tampered");

    assert_eq!(
        err,
        TrustError::IntegrityViolation {
            execution_id: trace.execution_id
        }
    );
    assert!(engine.drain_execution_log().is_empty());
    assert_eq!(engine.audit_summary().total_executions, 1);
}

#[test]
fn audit_summary_survives_drain() {
    let engine = engine(FnBackend::canned());
    let metadata = demo_metadata();
    let first = engine
        .analyze(&input("demo-lib", &metadata, None))
        .expect("first");
    let second = engine
        .analyze(&input("demo-lib", &metadata, None))
        .expect("second");
    assert_ne!(first.trace.execution_id, second.trace.execution_id);

    let drained = engine.drain_execution_log();
    assert_eq!(drained.len(), 2);
    assert!(engine.drain_execution_log().is_empty());

    let summary = engine.audit_summary();
    assert_eq!(summary.total_executions, 2);
    assert_eq!(summary.verdicts.values().sum::<u64>(), 2);
    assert_eq!(summary.last_execution.as_deref(), Some(second.trace.execution_id.as_str()));
    let expected = (first.trace.confidence + second.trace.confidence) / 2.0;
    assert!((summary.average_confidence - expected).abs() < 1e-9);
}
