//! Wikipedia 工具：MediaWiki 搜索 + REST 摘要
//!
//! 先用 action=query&list=search 找到前 top_k 个条目，再逐个取 /page/summary，
//! 输出 "Page: ...\nSummary: ..." 段落，总长度不超过 max_chars。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::WikipediaSection;
use crate::tools::registry::args_schema;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WikipediaArgs {
    /// Topic or question to look up on Wikipedia
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    #[serde(default)]
    extract: String,
}

pub struct WikipediaTool {
    client: Client,
    base: String,
    top_k: usize,
    max_chars: usize,
}

impl WikipediaTool {
    pub fn new(section: &WikipediaSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .user_agent(concat!("sidekick/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: format!("https://{}.wikipedia.org", section.language),
            top_k: section.top_k.max(1),
            max_chars: section.max_chars,
        }
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<String>, String> {
        let limit = self.top_k.to_string();
        let resp: SearchResponse = self
            .client
            .get(format!("{}/w/api.php", self.base))
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("format", "json"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {}", e))?;
        Ok(resp
            .query
            .map(|q| q.search.into_iter().map(|h| h.title).collect())
            .unwrap_or_default())
    }

    async fn summary(&self, title: &str) -> Option<String> {
        let url = format!(
            "{}/api/rest_v1/page/summary/{}",
            self.base,
            title.replace(' ', "_")
        );
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            tracing::debug!(title = %title, status = %resp.status(), "wikipedia summary unavailable");
            return None;
        }
        resp.json::<PageSummary>().await.ok().map(|s| s.extract)
    }
}

/// 拼接条目并按字符数截断
pub fn format_pages(pages: &[(String, String)], max_chars: usize) -> String {
    if pages.is_empty() {
        return "No good Wikipedia Search Result was found".to_string();
    }
    let text = pages
        .iter()
        .map(|(title, summary)| format!("Page: {}\nSummary: {}", title, summary))
        .collect::<Vec<_>>()
        .join("\n\n");
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "A wrapper around Wikipedia. Useful for when you need to answer general questions about people, places, companies, facts, historical events, or other subjects."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<WikipediaArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: WikipediaArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "wikipedia lookup");
        let mut pages = Vec::new();
        for title in self.search_titles(query).await? {
            if let Some(summary) = self.summary(&title).await {
                pages.push((title, summary));
            }
        }
        Ok(format_pages(&pages, self.max_chars))
    }
}
