use super::*;
use crate::model::DependencyRef;

fn steps(count: usize) -> Vec<String> {
    (0..count).map(|idx| format!("step {idx} complete")).collect()
}

fn rich_metadata() -> RecordMetadata {
    RecordMetadata {
        name: "demo-lib".to_string(),
        version: "1.2.0".to_string(),
        description: "A small, well documented library for parsing demo configuration files."
            .to_string(),
        repository: "https://github.com/demo/demo-lib".to_string(),
        keywords: vec!["config".to_string(), "parser".to_string(), "demo".to_string()],
        categories: vec!["parsing".to_string()],
        readme: "x".repeat(1200),
        downloads: 250_000,
        dependencies: vec![DependencyRef {
            crate_id: "serde".to_string(),
            kind: "normal".to_string(),
            req: None,
        }],
        features: BTreeMap::from([("std".to_string(), Vec::new())]),
        code_snippets: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        ..RecordMetadata::default()
    }
}

#[test]
fn decision_table_matches_documented_examples() {
    let four = steps(4);
    assert_eq!(decide(&four, 8.5, &[3.0, 4.0, 9.0]).0, TrustVerdict::Allow);
    assert_eq!(decide(&four, 5.0, &[5.0, 5.0, 5.0]).0, TrustVerdict::Flag);
    assert_eq!(decide(&four, 2.0, &[2.0, 2.0, 2.0]).0, TrustVerdict::Deny);
    assert_eq!(decide(&steps(2), 9.5, &[9.0; 4]).0, TrustVerdict::Defer);
}

#[test]
fn medium_scores_require_every_criterion_at_least_three() {
    let four = steps(4);
    assert_eq!(decide(&four, 6.5, &[3.0, 6.0, 7.0, 8.0]).0, TrustVerdict::Allow);
    assert_eq!(decide(&four, 6.5, &[2.9, 6.0, 7.0, 8.0]).0, TrustVerdict::Flag);
    assert_eq!(decide(&four, 4.0, &[9.0; 4]).0, TrustVerdict::Flag);
    assert_eq!(decide(&four, 3.99, &[9.0; 4]).0, TrustVerdict::Deny);
}

#[test]
fn error_markers_flag_before_score_rules() {
    let mut degraded = steps(4);
    degraded.push("Documentation analysis FAILED, using fallback values".to_string());
    assert_eq!(decide(&degraded, 9.9, &[9.0; 4]).0, TrustVerdict::Flag);

    let mut timeout = steps(3);
    timeout[1] = "backend timeout".to_string();
    assert_eq!(decide(&timeout, 9.9, &[9.0; 4]).0, TrustVerdict::Flag);
}

#[test]
fn decision_is_deterministic() {
    let four = steps(4);
    let first = decide(&four, 6.2, &[4.0, 5.0, 6.0, 7.0]);
    for _ in 0..10 {
        assert_eq!(decide(&four, 6.2, &[4.0, 5.0, 6.0, 7.0]), first);
    }
}

#[test]
fn end_to_end_demo_confidence() {
    let four = steps(4);
    let (verdict, _) = decide(&four, 7.2, &[4.0, 7.0, 8.0, 9.0]);
    assert_eq!(verdict, TrustVerdict::Allow);
    let value = confidence(3, four.len(), 7.2, Some(verdict));
    assert!((value - 0.791).abs() < 1e-9, "confidence {value}");
    assert!((0.55..=0.85).contains(&value));
}

#[test]
fn confidence_stays_in_unit_interval() {
    let verdicts = [
        None,
        Some(TrustVerdict::Allow),
        Some(TrustVerdict::Deny),
        Some(TrustVerdict::Defer),
        Some(TrustVerdict::Flag),
    ];
    for sources in [0, 1, 3, 10] {
        for steps in [0, 2, 8, 40] {
            for score in [-5.0, 0.0, 4.5, 10.0, 25.0] {
                for verdict in verdicts {
                    let value = confidence(sources, steps, score, verdict);
                    assert!((0.0..=1.0).contains(&value), "{sources} {steps} {score} {verdict:?}");
                }
            }
        }
    }
    let saturated = confidence(10, 40, 10.0, Some(TrustVerdict::Allow));
    assert!((saturated - 1.0).abs() < 1e-9);
}

#[test]
fn rich_metadata_scores_high_on_every_criterion() {
    let metadata = rich_metadata();
    let now = 1_700_000_000_000;
    let stats = RepoStats {
        stars: 2_000,
        forks: 80,
        updated_at_epoch_ms: Some(now - 5 * DAY_MS),
        ..RepoStats::default()
    };
    let criteria = score_criteria(&Signals {
        metadata: &metadata,
        repo_stats: Some(&stats),
        doc_ratings: DocRatings {
            completeness: 8.0,
            clarity: 9.0,
            examples: 7.0,
        },
        sentiment: Sentiment::Positive,
        now_epoch_ms: now,
    });
    assert!((criteria.documentation - 9.2).abs() < 1e-9);
    assert_eq!(criteria.adoption, 10.0);
    assert_eq!(criteria.maintenance, 10.0);
    assert_eq!(criteria.api_design, 9.0);
    assert!(criteria.weighted_total() > 9.0);
    assert!(criteria.weighted_total() <= 10.0);
}

#[test]
fn sparse_metadata_scores_low() {
    let metadata = RecordMetadata {
        name: "tiny".to_string(),
        version: "0.0.1".to_string(),
        ..RecordMetadata::default()
    };
    let criteria = score_criteria(&Signals {
        metadata: &metadata,
        repo_stats: None,
        doc_ratings: DocRatings::FALLBACK,
        sentiment: Sentiment::Negative,
        now_epoch_ms: 0,
    });
    assert!((criteria.documentation - 2.0).abs() < 1e-9);
    assert_eq!(criteria.adoption, 0.0);
    assert_eq!(criteria.maintenance, 6.0);
    assert_eq!(criteria.api_design, 0.0);
}

#[test]
fn stale_repositories_and_heavy_dependency_trees_lose_maintenance() {
    let mut metadata = rich_metadata();
    metadata.dependencies = (0..60)
        .map(|idx| DependencyRef {
            crate_id: format!("dep{idx}"),
            kind: "normal".to_string(),
            req: None,
        })
        .collect();
    let now = 1_700_000_000_000;
    let stats = RepoStats {
        updated_at_epoch_ms: Some(now - 400 * DAY_MS),
        ..RepoStats::default()
    };
    assert_eq!(maintenance_score(&metadata, Some(&stats), now), 4.0);
}

#[test]
fn suggestion_tiers_follow_score() {
    assert!(suggestion(8.0).starts_with("HIGH CONFIDENCE"));
    assert!(suggestion(7.2).starts_with("MEDIUM CONFIDENCE"));
    assert!(suggestion(7.2).contains("7.2/10"));
    assert!(suggestion(4.0).starts_with("LOW CONFIDENCE"));
    assert!(suggestion(1.0).starts_with("NOT RECOMMENDED"));
}

#[test]
fn criteria_map_uses_stable_names() {
    let criteria = CriteriaScores {
        documentation: 1.0,
        adoption: 2.0,
        maintenance: 3.0,
        api_design: 4.0,
    };
    let map = criteria.to_map();
    let names: Vec<&str> = map.keys().map(String::as_str).collect();
    assert_eq!(names, ["adoption", "api_design", "documentation", "maintenance"]);
    assert!((criteria.weighted_total() - 2.35).abs() < 1e-9);
}
