//! Acceptance checks applied to cleaned model output before it is used.
use crate::model::UseCase;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Minimum number of factual/counterfactual pairs a response must carry.
pub const MIN_FACTUAL_PAIRS: usize = 3;

/// Accept any output longer than `min_chars` characters.
pub fn min_length(min_chars: usize) -> impl Fn(&str) -> bool + Send + Sync {
    move |text: &str| text.trim().chars().count() > min_chars
}

/// Exact case-insensitive match against the closed category list.
pub fn classification(text: &str) -> bool {
    UseCase::from_label(text).is_some()
}

pub fn factual_pairs(text: &str) -> bool {
    extract_factual_pairs(text).len() >= MIN_FACTUAL_PAIRS
}

fn pair_marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?i)(?:✅|❌)\s*(factual|counterfactual)\b\s*:?|\b(factual|counterfactual)\s*:")
            .expect("regex for factual pair markers")
    })
}

/// Extract `(factual, counterfactual)` statements in order of appearance.
///
/// Each marker's statement runs until the next marker. Facts and
/// counterfactuals are paired by position, so a dangling statement is dropped.
pub fn extract_factual_pairs(text: &str) -> Vec<(String, String)> {
    let markers: Vec<(bool, usize, usize)> = pair_marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = caps.get(1).or_else(|| caps.get(2))?;
            let is_fact = kind.as_str().eq_ignore_ascii_case("factual");
            Some((is_fact, whole.start(), whole.end()))
        })
        .collect();

    let mut facts = Vec::new();
    let mut counterfacts = Vec::new();
    for (idx, (is_fact, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers
            .get(idx + 1)
            .map(|(_, start, _)| *start)
            .unwrap_or(text.len());
        let statement = text[*body_start..body_end].trim().to_string();
        if statement.is_empty() {
            continue;
        }
        if *is_fact {
            facts.push(statement);
        } else {
            counterfacts.push(statement);
        }
    }
    facts.into_iter().zip(counterfacts).collect()
}

/// Normalize extracted pairs into the canonical two-line block format.
pub fn format_factual_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(fact, counter)| format!("✅ Factual: {fact}\n❌ Counterfactual: {counter}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Community sentiment labels a model may answer with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    /// First sentiment word found in the output, if any.
    pub fn parse(text: &str) -> Option<Sentiment> {
        text.split(|c: char| !c.is_alphanumeric())
            .find_map(|word| match word.to_ascii_lowercase().as_str() {
                "positive" => Some(Sentiment::Positive),
                "neutral" => Some(Sentiment::Neutral),
                "negative" => Some(Sentiment::Negative),
                _ => None,
            })
    }
}

pub fn sentiment(text: &str) -> bool {
    Sentiment::parse(text).is_some()
}

/// Model-assessed documentation quality, each rating 1-10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocRatings {
    pub completeness: f64,
    pub clarity: f64,
    pub examples: f64,
}

impl DocRatings {
    pub const FALLBACK: DocRatings = DocRatings {
        completeness: 5.0,
        clarity: 5.0,
        examples: 5.0,
    };

    pub fn mean(&self) -> f64 {
        (self.completeness + self.clarity + self.examples) / 3.0
    }

    fn in_range(&self) -> bool {
        [self.completeness, self.clarity, self.examples]
            .iter()
            .all(|rating| (1.0..=10.0).contains(rating))
    }

    /// Parse the first JSON object in the output into in-range ratings.
    pub fn parse(text: &str) -> Option<DocRatings> {
        let value = extract_json_object(text)?;
        let ratings: DocRatings = serde_json::from_value(value).ok()?;
        ratings.in_range().then_some(ratings)
    }
}

pub fn doc_ratings(text: &str) -> bool {
    DocRatings::parse(text).is_some()
}

/// First parseable JSON object embedded in free text, tolerating code fences.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    for (idx, ch) in raw.char_indices() {
        if ch != '{' {
            continue;
        }
        let mut deserializer = serde_json::Deserializer::from_str(&raw[idx..]);
        if let Ok(value) = Value::deserialize(&mut deserializer) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    None
}
