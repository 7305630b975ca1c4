//! Documentation page scraper for docs.rs and lib.rs.
//!
//! Pages are reduced to plain text with a tag-stripping pass; no structured
//! extraction is attempted, so quality scores come from text richness alone.
use super::{scrape_quality, DocScraper, USER_AGENT};
use crate::model::ScrapeResult;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

pub struct DocsScraper {
    agent: ureq::Agent,
}

fn page_sources(identifier: &str) -> [(&'static str, String); 2] {
    [
        ("docs_rs", format!("https://docs.rs/{identifier}")),
        ("lib_rs", format!("https://lib.rs/crates/{identifier}")),
    ]
}

impl DocsScraper {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }

    fn fetch_page(&self, url: &str) -> Result<String, String> {
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| format!("GET {url}: {err}"))?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|err| format!("read {url}: {err}"))
    }
}

impl DocScraper for DocsScraper {
    fn scrape(&self, identifier: &str) -> BTreeMap<String, ScrapeResult> {
        let mut results = BTreeMap::new();
        for (source, url) in page_sources(identifier) {
            let result = match self.fetch_page(&url) {
                Ok(html) => page_result(&html),
                Err(err) => {
                    tracing::warn!(identifier, source, %err, "scrape failed");
                    ScrapeResult {
                        title: "Scraping Failed".to_string(),
                        error: Some(err),
                        ..ScrapeResult::default()
                    }
                }
            };
            results.insert(source.to_string(), result);
        }
        results
    }
}

fn html_regexes() -> &'static (Regex, Regex, Regex, Regex) {
    static HTML: OnceLock<(Regex, Regex, Regex, Regex)> = OnceLock::new();
    HTML.get_or_init(|| {
        (
            Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("regex for html title"),
            Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
                .expect("regex for html scripts"),
            Regex::new(r"(?s)<[^>]+>").expect("regex for html tags"),
            Regex::new(r"[ \t]*\n\s*\n\s*").expect("regex for blank runs"),
        )
    })
}

/// Reduce a page to title plus readable text.
pub fn page_result(html: &str) -> ScrapeResult {
    let (title_re, script_re, tag_re, blank_re) = html_regexes();
    let title = title_re
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|title| decode_entities(title.as_str().trim()))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let without_scripts = script_re.replace_all(html, "");
    let text = tag_re.replace_all(&without_scripts, "\n");
    let text = decode_entities(blank_re.replace_all(&text, "\n\n").trim());
    let structured_data = serde_json::Value::Object(serde_json::Map::new());
    let quality_score = scrape_quality(&text, &structured_data);
    ScrapeResult {
        title,
        content: text,
        structured_data,
        quality_score,
        error: None,
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
