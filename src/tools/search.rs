//! Search 工具：Serper（Google 搜索 API）
//!
//! POST {endpoint}，Header X-API-KEY，Body {"q": query, "num": n}；
//! 结果按 answerBox → knowledgeGraph → organic 的顺序拼成纯文本，超过 max_result_chars 时截断。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::registry::args_schema;
use crate::tools::Tool;

const NO_RESULT: &str = "No good Google Search Result was found";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The search query
    pub query: String,
}

pub struct SerperSearchTool {
    client: Client,
    endpoint: String,
    api_key: String,
    num_results: usize,
    max_result_chars: usize,
}

impl SerperSearchTool {
    pub fn new(api_key: impl Into<String>, section: &SearchSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: section.endpoint.clone(),
            api_key: api_key.into(),
            num_results: section.num_results,
            max_result_chars: section.max_result_chars,
        }
    }

    /// 从环境变量 SERPER_API_KEY 构造；未设置时返回 None（不注册该工具）
    pub fn from_env(section: &SearchSection) -> Option<Self> {
        std::env::var("SERPER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|key| Self::new(key, section))
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": self.num_results }))
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {}", e))?;
        let text = format_results(&body);
        if text.chars().count() > self.max_result_chars {
            Ok(text.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]")
        } else {
            Ok(text)
        }
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|x| x.as_str()).filter(|s| !s.trim().is_empty())
}

/// Serper JSON → 纯文本
pub fn format_results(body: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(answer_box) = body.get("answerBox") {
        if let Some(answer) = str_field(answer_box, "answer").or_else(|| str_field(answer_box, "snippet")) {
            parts.push(answer.replace('\n', " "));
        }
    }

    if let Some(kg) = body.get("knowledgeGraph") {
        let title = str_field(kg, "title");
        if let Some(kind) = str_field(kg, "type") {
            parts.push(format!("{}: {}", title.unwrap_or_default(), kind));
        }
        if let Some(desc) = str_field(kg, "description") {
            parts.push(desc.to_string());
        }
        if let Some(attrs) = kg.get("attributes").and_then(|a| a.as_object()) {
            for (key, value) in attrs {
                if let Some(v) = value.as_str() {
                    parts.push(format!("{} {}: {}", title.unwrap_or_default(), key, v));
                }
            }
        }
    }

    if let Some(organic) = body.get("organic").and_then(|o| o.as_array()) {
        for item in organic {
            let title = str_field(item, "title").unwrap_or_default();
            let link = str_field(item, "link").unwrap_or_default();
            match str_field(item, "snippet") {
                Some(snippet) => parts.push(format!("{}\n{}\n{}", title, snippet, link)),
                None if !title.is_empty() => parts.push(format!("{}\n{}", title, link)),
                None => {}
            }
        }
    }

    if parts.is_empty() {
        NO_RESULT.to_string()
    } else {
        parts.join("\n\n")
    }
}

#[async_trait]
impl Tool for SerperSearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Use this tool when you want to get the results of an online web search"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<SearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: SearchArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "search tool query");
        self.search(query).await
    }
}
