//! Prompt assembly and token-budget truncation.
//!
//! Token counts are estimates: one token per word run or punctuation mark.
//! Every truncation path measures with the same estimator so limits agree.
use regex::Regex;
use std::sync::OnceLock;

pub const SYSTEM_MARKER: &str = "<|system|>";
pub const USER_MARKER: &str = "<|user|>";
pub const END_MARKER: &str = "<|end|>";

/// Stop sequences every backend call is issued with.
pub fn default_stop_sequences() -> Vec<String> {
    [END_MARKER, USER_MARKER, SYSTEM_MARKER]
        .iter()
        .map(|marker| marker.to_string())
        .collect()
}

/// A chat-style prompt with optional few-shot examples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub examples: Vec<String>,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            examples: Vec::new(),
            user: user.into(),
        }
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Drop few-shot examples and reduce the system instruction.
    pub fn simplified(&self) -> Prompt {
        Prompt {
            system: "Be concise.".to_string(),
            examples: Vec::new(),
            user: self.user.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(SYSTEM_MARKER);
        out.push_str(self.system.trim());
        out.push('\n');
        out.push_str(USER_MARKER);
        for (idx, example) in self.examples.iter().enumerate() {
            out.push_str(&format!("# Example {}\n{}\n\n", idx + 1, example.trim()));
        }
        out.push_str(self.user.trim());
        out.push('\n');
        out.push_str(END_MARKER);
        out
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\w+|[^\w\s]").expect("regex for token pieces"))
}

fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"^#+\s+").expect("regex for markdown headings"))
}

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    token_regex().find_iter(text).count()
}

/// Keep the first `max_tokens` tokens of `text`, cutting after the last kept token.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return String::new();
    }
    match token_regex().find_iter(text).nth(max_tokens - 1) {
        Some(last) => text[..last.end()].to_string(),
        None => text.to_string(),
    }
}

/// Greedily keep whole paragraphs while the running estimate fits.
pub fn truncate_content(content: &str, max_tokens: usize) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for paragraph in content.split("\n\n") {
        let tokens = estimate_tokens(paragraph);
        if used + tokens > max_tokens {
            break;
        }
        kept.push(paragraph);
        used += tokens;
    }
    kept.join("\n\n")
}

#[derive(Debug)]
struct Section {
    priority: u8,
    text: String,
}

fn priority_rules() -> &'static [(Regex, u8)] {
    static RULES: OnceLock<Vec<(Regex, u8)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?i)\b(usage|example|getting started)\b", 10),
            (r"(?i)\b(feature|overview|about)\b", 9),
            (r"(?i)\b(install|setup|config)\b", 8),
            (r"(?i)\b(api|interface)\b", 7),
        ]
        .into_iter()
        .map(|(pattern, priority)| {
            (
                Regex::new(pattern).expect("regex for section priority"),
                priority,
            )
        })
        .collect()
    })
}

fn heading_priority(heading: &str) -> u8 {
    priority_rules()
        .iter()
        .find(|(rule, _)| rule.is_match(heading))
        .map(|(_, priority)| *priority)
        .unwrap_or(5)
}

fn split_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section {
        priority: 10,
        text: String::new(),
    };
    for line in content.lines() {
        if let Some(found) = heading_regex().find(line) {
            if !current.text.trim().is_empty() {
                sections.push(current);
            }
            current = Section {
                priority: heading_priority(&line[found.end()..]),
                text: String::new(),
            };
        } else if line.contains("```rust") || line.contains("```no_run") {
            current.priority = current.priority.max(8);
        }
        current.text.push_str(line);
        current.text.push('\n');
    }
    if !current.text.trim().is_empty() {
        sections.push(current);
    }
    sections
}

/// Truncate markdown by section priority: usage and examples first, then
/// overview, install, API, everything else. The first section that does not
/// fit is cut token-for-token when at least 100 tokens of budget remain.
pub fn smart_truncate(content: &str, max_tokens: usize) -> String {
    if content.is_empty() {
        return String::new();
    }
    if estimate_tokens(content) <= max_tokens {
        return content.to_string();
    }
    let mut sections = split_sections(content);
    // Stable sort keeps document order within a priority.
    sections.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut result = String::new();
    let mut used = 0usize;
    for section in sections {
        let text = format!("{}\n", section.text);
        let tokens = estimate_tokens(&text);
        if used + tokens <= max_tokens {
            result.push_str(&text);
            used += tokens;
        } else if used + 100 < max_tokens {
            result.push_str(&truncate_tokens(&text, max_tokens - used));
            break;
        }
    }
    result
}

/// Strip everything after the end marker and drop blank lines.
pub fn clean_output(raw: &str) -> String {
    let head = raw.split(END_MARKER).next().unwrap_or_default();
    head.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_counts_words_and_punctuation() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("Hello, world!"), 4);
        assert_eq!(estimate_tokens("fn main() {}"), 6);
    }

    #[test]
    fn truncate_tokens_cuts_after_nth_piece() {
        assert_eq!(truncate_tokens("alpha beta gamma", 2), "alpha beta");
        assert_eq!(truncate_tokens("alpha beta", 10), "alpha beta");
        assert_eq!(truncate_tokens("alpha", 0), "");
    }

    #[test]
    fn truncate_content_keeps_whole_paragraphs() {
        let content = "one two three\n\nfour five\n\nsix seven eight nine";
        assert_eq!(truncate_content(content, 5), "one two three\n\nfour five");
        assert_eq!(truncate_content(content, 2), "");
        let kept = truncate_content(content, 9);
        assert!(estimate_tokens(&kept) <= 9);
    }

    #[test]
    fn smart_truncate_returns_short_content_unchanged() {
        let content = "# Title\nshort body";
        assert_eq!(smart_truncate(content, 100), content);
        assert_eq!(smart_truncate("", 100), "");
    }

    #[test]
    fn smart_truncate_prefers_usage_over_license() {
        let filler = "word ".repeat(60);
        let content = format!(
            "# License\n{filler}\n# Usage\nuse demo::run;\n# Changelog\n{filler}\n"
        );
        let out = smart_truncate(&content, 80);
        assert!(out.contains("# Usage"));
        assert!(out.starts_with("# Usage"));
        assert!(estimate_tokens(&out) <= 80);
    }

    #[test]
    fn smart_truncate_cuts_last_section_when_room_remains() {
        let body = "token ".repeat(400);
        let content = format!("# Usage\n{body}\n# Other\nmore text");
        let out = smart_truncate(&content, 200);
        assert!(out.starts_with("# Usage"));
        assert_eq!(estimate_tokens(&out), 200);
    }

    #[test]
    fn rust_fences_lift_section_priority() {
        let sections = split_sections("# Misc\n```rust\nfn x() {}\n```\n# Notes\ntext\n");
        assert_eq!(sections[0].priority, 8);
        assert_eq!(sections[1].priority, 5);
        assert_eq!(heading_priority("Getting Started"), 10);
        assert_eq!(heading_priority("API reference"), 7);
    }

    #[test]
    fn simplified_prompt_drops_examples() {
        let prompt = Prompt::new("You classify crates.", "Crate: demo")
            .with_example("Crate: tokio\nCategory: Networking");
        let rendered = prompt.render();
        assert!(rendered.contains("# Example 1"));
        assert!(rendered.starts_with(SYSTEM_MARKER));
        assert!(rendered.ends_with(END_MARKER));

        let simple = prompt.simplified().render();
        assert!(!simple.contains("# Example"));
        assert!(simple.contains("Be concise."));
        assert!(simple.contains("Crate: demo"));
    }

    #[test]
    fn clean_output_stops_at_end_marker() {
        let raw = "  Networking \n\n<|end|>\ntrailing junk";
        assert_eq!(clean_output(raw), "Networking");
    }
}
