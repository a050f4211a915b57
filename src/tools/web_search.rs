//! Web search tool.
//!
//! Each `web_search` block is one query. Date and time questions are answered
//! locally; everything else goes to a [`SearchBackend`], DuckDuckGo's HTML
//! interface by default.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::{BreathlessError, Result};
use crate::tool::Tool;

pub const WEB_SEARCH_TAG: &str = "web_search";

/// Results shown per query.
pub const DISPLAYED_RESULTS: usize = 5;
const DESCRIPTION_LIMIT: usize = 200;

const DATE_PHRASES: &[&str] = &[
    "current date",
    "today date",
    "what date",
    "date today",
    "todays date",
];
const TIME_PHRASES: &[&str] = &["current time", "what time", "time now"];

const FAILURE_INDICATORS: &[&str] = &["Error:", "Search failed", "No search results found"];
const SUCCESS_INDICATORS: &[&str] = &["Current Date:", "Current Time:", "Result 1:"];

/// Web search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

/// Source of search results.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// Configuration for the DuckDuckGo backend
#[derive(Clone, Debug)]
pub struct DuckDuckGoConfig {
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for DuckDuckGoConfig {
    fn default() -> Self {
        Self {
            max_results: 8,
            timeout_secs: 10,
        }
    }
}

pub struct DuckDuckGoBackend {
    client: reqwest::Client,
}

impl DuckDuckGoBackend {
    pub fn new(config: &DuckDuckGoConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; BreathlessBot/1.0)")
            .build()
            .map_err(|e| BreathlessError::ToolInvocation {
                name: WEB_SEARCH_TAG.into(),
                source: Box::new(e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoBackend {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );

        let invocation = |e: reqwest::Error| BreathlessError::ToolInvocation {
            name: WEB_SEARCH_TAG.into(),
            source: Box::new(e),
        };

        let html = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(invocation)?
            .text()
            .await
            .map_err(invocation)?;

        Ok(parse_duckduckgo_html(&html, max_results))
    }
}

/// Parse DuckDuckGo HTML response to extract search results
pub fn parse_duckduckgo_html(html: &str, max_results: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    // Results are <a class="result__a" href="...">title</a> followed by
    // <a class="result__snippet" ...>body</a>
    for chunk in html.split("class=\"result__a\"").skip(1) {
        if results.len() >= max_results {
            break;
        }

        let href = chunk
            .split("href=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .map(resolve_redirect)
            .unwrap_or_default();

        let title = chunk
            .split_once('>')
            .and_then(|(_, s)| s.split("</a>").next())
            .map(strip_tags)
            .unwrap_or_default();

        let body = chunk
            .split("result__snippet")
            .nth(1)
            .and_then(|s| s.split_once('>'))
            .and_then(|(_, s)| s.split("</a>").next())
            .map(strip_tags)
            .unwrap_or_default();

        if !title.is_empty() && href.starts_with("http") {
            results.push(SearchResult {
                title: html_decode(&title),
                href,
                body: html_decode(&body),
            });
        }
    }

    results
}

/// Unwrap DuckDuckGo's `/l/?uddg=<target>` redirect links.
fn resolve_redirect(href: &str) -> String {
    let Some((_, rest)) = href.split_once("uddg=") else {
        return href.to_string();
    };
    let encoded = rest.split('&').next().unwrap_or(rest);
    urlencoding::decode(encoded)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| href.to_string())
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Simple HTML entity decoding
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
}

/// Answer date/time questions without a network round trip.
pub fn builtin_answer(query: &str) -> Option<String> {
    let query = query.trim().to_lowercase();
    if DATE_PHRASES.iter().any(|p| query.contains(p)) {
        return Some(format!(
            "Current Date: {}",
            Local::now().format("%A, %B %d, %Y")
        ));
    }
    if TIME_PHRASES.iter().any(|p| query.contains(p)) {
        return Some(format!("Current Time: {}", Local::now().format("%I:%M %p")));
    }
    None
}

pub fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No search results found for: {query}");
    }
    results
        .iter()
        .take(DISPLAYED_RESULTS)
        .enumerate()
        .map(|(i, result)| {
            format!(
                "Result {}:\nTitle: {}\nURL: {}\nDescription: {}",
                i + 1,
                result.title,
                result.href,
                truncate_description(&result.body)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_description(body: &str) -> String {
    if body.chars().count() > DESCRIPTION_LIMIT {
        let cut: String = body.chars().take(DESCRIPTION_LIMIT).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    }
}

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            max_results: DuckDuckGoConfig::default().max_results,
        }
    }

    pub fn duckduckgo(config: DuckDuckGoConfig) -> Result<Self> {
        let backend = DuckDuckGoBackend::new(&config)?;
        Ok(Self {
            backend: Arc::new(backend),
            max_results: config.max_results,
        })
    }

    async fn search(&self, query: &str) -> String {
        tracing::info!(query, "web search");
        match self.backend.search(query, self.max_results).await {
            Ok(results) => format_results(query, &results),
            Err(e) => {
                let detail = match &e {
                    BreathlessError::ToolInvocation { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                tracing::warn!(query, error = %detail, "web search failed");
                let mut message = format!("Search failed: {detail}");
                if detail.contains("429") {
                    message.push_str(" (Rate limited - wait before searching again)");
                }
                message
            }
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn tag(&self) -> &str {
        WEB_SEARCH_TAG
    }

    fn description(&self) -> &str {
        "Search the web. Each ```web_search block holds one query."
    }

    async fn execute(&self, blocks: &[String]) -> String {
        if blocks.is_empty() {
            return "Error: No search query provided".to_string();
        }
        let mut output = String::new();
        for block in blocks {
            let query = block.trim();
            if query.is_empty() {
                output.push_str("Error: Empty search query\n");
                continue;
            }
            if let Some(answer) = builtin_answer(query) {
                output.push_str(&answer);
                output.push('\n');
                continue;
            }
            let results = self.search(query).await;
            output.push_str(&format!("Search results for '{query}':\n{results}\n"));
        }
        output.trim().to_string()
    }

    fn check_failure(&self, output: &str) -> bool {
        if output.is_empty() {
            return true;
        }
        let has_failure = FAILURE_INDICATORS.iter().any(|i| output.contains(i));
        let has_success = SUCCESS_INDICATORS.iter().any(|i| output.contains(i));
        has_failure && !has_success
    }

    fn feedback_label(&self, success: bool) -> String {
        if success {
            "Web search completed".to_string()
        } else {
            "Web search failed".to_string()
        }
    }
}
