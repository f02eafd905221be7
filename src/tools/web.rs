//! Web search via DuckDuckGo's HTML endpoint.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::Tool;

/// Search the web. Needs no API key.
pub struct WebSearch {
    client: reqwest::Client,
    base_url: String,
    max_results: usize,
}

impl WebSearch {
    pub fn new(base_url: impl Into<String>, max_results: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; SearchChat/0.1)")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for search");
                reqwest::Client::new()
            });

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_results,
        }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "Search"
    }

    fn description(&self) -> &str {
        "Searches the web with DuckDuckGo. Useful for questions about current events or facts you are unsure of. Input should be a search query."
    }

    async fn execute(&self, input: &str) -> anyhow::Result<String> {
        let query = input.trim();
        if query.is_empty() {
            anyhow::bail!("search query is empty");
        }

        let url = format!("{}/html/?q={}", self.base_url, urlencoding::encode(query));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("search request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("search backend returned HTTP {}", status);
        }

        let html = response.text().await.context("reading search response")?;
        let results = extract_ddg_results(&html, self.max_results);
        tracing::debug!(query = %query, results = results.len(), "Search completed");

        if results.is_empty() {
            Ok(format!("No good search results found for: {}", query))
        } else {
            Ok(results.join("\n\n"))
        }
    }
}

/// Pull title, snippet and URL out of DuckDuckGo result blocks.
fn extract_ddg_results(html: &str, limit: usize) -> Vec<String> {
    html.split("result__body")
        .skip(1)
        .filter_map(|chunk| {
            let title = field_text(chunk, "result__a")?;
            let snippet = field_text(chunk, "result__snippet").unwrap_or_default();
            let url = field_text(chunk, "result__url").unwrap_or_default();
            Some(format!(
                "{}\n{}\nURL: {}",
                html_decode(&title),
                html_decode(&snippet),
                url.trim()
            ))
        })
        .take(limit)
        .collect()
}

/// Text of the first element carrying `class`, with nested tags removed.
fn field_text(chunk: &str, class: &str) -> Option<String> {
    let marker = format!("class=\"{}\"", class);
    let after = chunk.split(marker.as_str()).nth(1)?;
    let body = after.split_once('>')?.1;
    let closing = body.find("</a>").or_else(|| body.find("</div>")).unwrap_or(body.len());
    let text = strip_tags(&body[..closing]);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}
