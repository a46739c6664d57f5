//! 浏览器会话与页面工具
//!
//! BrowserSession 是按线程持有的有状态资源（页面历史、Cookie）；默认实现 HttpBrowser 基于 reqwest，
//! 用 html2text 提取可读文本。启用 feature "browser" 时可换成 headless Chrome（见 chrome.rs）。
//! 页面工具（navigate_browser / current_webpage / previous_webpage / extract_text / extract_hyperlinks）
//! 绑定到某个会话实例，由 ResourceManager 在创建会话时一并生成。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::with_timeout;
use crate::tools::registry::{Tool, ToolRegistry, ToolSpec};
use crate::tools::resource::ResourceFactory;

pub const NAVIGATE_BROWSER: &str = "navigate_browser";
pub const CURRENT_WEBPAGE: &str = "current_webpage";
pub const PREVIOUS_WEBPAGE: &str = "previous_webpage";
pub const EXTRACT_TEXT: &str = "extract_text";
pub const EXTRACT_HYPERLINKS: &str = "extract_hyperlinks";

/// 有状态的浏览会话（每个 thread_id 至多一个）
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// 打开 URL，返回状态描述
    async fn navigate(&self, url: &str) -> Result<String, String>;

    async fn current_url(&self) -> Result<String, String>;

    /// 回到上一页，返回状态描述
    async fn go_back(&self) -> Result<String, String>;

    /// 当前页面可读文本
    async fn page_text(&self) -> Result<String, String>;

    /// 当前页面的绝对链接
    async fn hyperlinks(&self) -> Result<Vec<String>, String>;

    async fn close(&self) -> Result<(), String>;
}

fn truncate(text: String, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

/// 将 HTML 转为可读文本
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => html.to_string(),
    }
}

/// 提取 <a href> 并按 base 解析为绝对 URL（去重，保持出现顺序）
pub fn extract_links(html: &str, base: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#) else {
        return Vec::new();
    };
    let base = Url::parse(base).ok();
    let mut links: Vec<String> = Vec::new();
    for cap in re.captures_iter(html) {
        let href = cap[1].trim();
        if href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let resolved = match &base {
            Some(b) => b.join(href).map(|u| u.to_string()).ok(),
            None => Url::parse(href).map(|u| u.to_string()).ok(),
        };
        if let Some(link) = resolved {
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }
    links
}

struct Page {
    url: String,
    html: String,
}

/// 基于 reqwest 的浏览会话：Cookie 持久、页面历史、无 JS 执行
pub struct HttpBrowser {
    client: Client,
    max_chars: usize,
    history: Mutex<Vec<Page>>,
    closed: AtomicBool,
}

impl HttpBrowser {
    pub fn new(client: Client, max_chars: usize) -> Self {
        Self {
            client,
            max_chars,
            history: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), String> {
        if self.closed.load(Ordering::SeqCst) {
            Err("Browser session is closed".to_string())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowserSession for HttpBrowser {
    async fn navigate(&self, url: &str) -> Result<String, String> {
        self.ensure_open()?;
        let parsed = Url::parse(url.trim()).map_err(|e| format!("Invalid URL '{}': {}", url, e))?;
        let resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| format!("Browser navigation failed: {}", e))?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let html = resp
            .text()
            .await
            .map_err(|e| format!("Read page body: {}", e))?;
        let html = html.trim_start_matches('\u{FEFF}').to_string();
        self.history.lock().await.push(Page {
            url: final_url.clone(),
            html,
        });
        Ok(format!(
            "Navigating to {} returned status code {}",
            final_url,
            status.as_u16()
        ))
    }

    async fn current_url(&self) -> Result<String, String> {
        self.ensure_open()?;
        let history = self.history.lock().await;
        Ok(history
            .last()
            .map(|p| p.url.clone())
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn go_back(&self) -> Result<String, String> {
        self.ensure_open()?;
        let mut history = self.history.lock().await;
        if history.len() < 2 {
            return Err("Unable to navigate back; no previous page in the history".to_string());
        }
        history.pop();
        let url = history.last().map(|p| p.url.clone()).unwrap_or_default();
        Ok(format!("Navigated back to the previous page with URL '{}'", url))
    }

    async fn page_text(&self) -> Result<String, String> {
        self.ensure_open()?;
        let history = self.history.lock().await;
        let page = history
            .last()
            .ok_or_else(|| "No page loaded. Use navigate_browser first.".to_string())?;
        Ok(truncate(html_to_text(&page.html), self.max_chars))
    }

    async fn hyperlinks(&self) -> Result<Vec<String>, String> {
        self.ensure_open()?;
        let history = self.history.lock().await;
        let page = history
            .last()
            .ok_or_else(|| "No page loaded. Use navigate_browser first.".to_string())?;
        Ok(extract_links(&page.html, &page.url))
    }

    async fn close(&self) -> Result<(), String> {
        self.closed.store(true, Ordering::SeqCst);
        self.history.lock().await.clear();
        Ok(())
    }
}

/// 默认会话工厂：每个线程一个独立 Cookie jar 的 reqwest 客户端
pub struct HttpBrowserFactory {
    user_agent: String,
    request_timeout: Duration,
    max_chars: usize,
}

impl HttpBrowserFactory {
    pub fn new(user_agent: impl Into<String>, request_timeout: Duration, max_chars: usize) -> Self {
        Self {
            user_agent: user_agent.into(),
            request_timeout,
            max_chars,
        }
    }
}

#[async_trait]
impl ResourceFactory for HttpBrowserFactory {
    async fn create(&self, thread_id: &str) -> Result<Arc<dyn BrowserSession>, String> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(self.request_timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| format!("Browser client init failed: {}", e))?;
        tracing::debug!(thread_id = %thread_id, "http browser session created");
        Ok(Arc::new(HttpBrowser::new(client, self.max_chars)))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NavigateArgs {
    /// Absolute URL to open, e.g. https://example.com
    pub url: String,
}

/// 没有参数的页面工具
#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoArgs {}

fn navigate_spec() -> ToolSpec {
    ToolSpec::with_schema::<NavigateArgs>(
        NAVIGATE_BROWSER,
        "Navigate the browser to the specified URL",
    )
}

fn page_spec(name: &str) -> ToolSpec {
    let description = match name {
        CURRENT_WEBPAGE => "Returns the URL of the current page",
        PREVIOUS_WEBPAGE => "Navigate back to the previous page in the browser history",
        EXTRACT_TEXT => "Extract all the text on the current webpage",
        _ => "Extract all hyperlinks on the current webpage",
    };
    ToolSpec::with_schema::<NoArgs>(name, description)
}

/// 页面工具描述（无需创建会话，供 Worker 提前声明）
pub fn toolkit_specs() -> Vec<ToolSpec> {
    vec![
        navigate_spec(),
        page_spec(CURRENT_WEBPAGE),
        page_spec(PREVIOUS_WEBPAGE),
        page_spec(EXTRACT_TEXT),
        page_spec(EXTRACT_HYPERLINKS),
    ]
}

/// 为某个会话生成绑定的页面工具集；每次浏览器操作受 op_timeout 约束
pub fn browser_toolkit(session: Arc<dyn BrowserSession>, op_timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for spec in toolkit_specs() {
        registry.register(PageTool {
            spec,
            session: Arc::clone(&session),
            op_timeout,
        });
    }
    registry
}

/// 绑定到单个会话的页面工具（按名称分派动作）
struct PageTool {
    spec: ToolSpec,
    session: Arc<dyn BrowserSession>,
    op_timeout: Duration,
}

impl PageTool {
    async fn run(&self, args: Value) -> Result<String, String> {
        match self.spec.name.as_str() {
            NAVIGATE_BROWSER => {
                let args: NavigateArgs =
                    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
                tracing::info!(url = %args.url, "browser navigate");
                self.session.navigate(&args.url).await
            }
            CURRENT_WEBPAGE => self.session.current_url().await,
            PREVIOUS_WEBPAGE => self.session.go_back().await,
            EXTRACT_TEXT => self.session.page_text().await,
            EXTRACT_HYPERLINKS => {
                let links = self.session.hyperlinks().await?;
                serde_json::to_string(&links).map_err(|e| e.to_string())
            }
            other => Err(format!("Unsupported browser action: {}", other)),
        }
    }
}

#[async_trait]
impl Tool for PageTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let operation = format!("browser:{}", self.spec.name);
        with_timeout(&operation, self.op_timeout, self.run(args))
            .await
            .map_err(|e| e.to_string())?
    }
}
