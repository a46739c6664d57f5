//! Headless Chrome 会话（feature "browser"）
//!
//! 需系统已安装 Chrome/Chromium。headless_chrome 为同步 API，所有操作经 spawn_blocking 执行；
//! 每个线程一个独立 Browser 进程与 Tab。

use std::sync::Arc;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::tools::browser::{extract_links, html_to_text, BrowserSession};
use crate::tools::resource::ResourceFactory;

pub struct ChromeSession {
    browser: Browser,
    tab: Arc<Tab>,
    max_chars: usize,
}

impl ChromeSession {
    async fn blocking<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, String> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .map_err(|e| format!("Task join: {}", e))?
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<String, String> {
        let url = url.trim().to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .map_err(|e| format!("Browser navigation failed: {}", e))?;
            tab.wait_until_navigated()
                .map_err(|e| format!("Page load failed: {}", e))?;
            Ok(format!("Navigating to {} returned status code 200", tab.get_url()))
        })
        .await
    }

    async fn current_url(&self) -> Result<String, String> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn go_back(&self) -> Result<String, String> {
        self.blocking(|tab| {
            tab.evaluate("history.back()", false)
                .map_err(|e| format!("Browser back failed: {}", e))?;
            tab.wait_until_navigated()
                .map_err(|e| format!("Page load failed: {}", e))?;
            Ok(format!(
                "Navigated back to the previous page with URL '{}'",
                tab.get_url()
            ))
        })
        .await
    }

    async fn page_text(&self) -> Result<String, String> {
        let max_chars = self.max_chars;
        self.blocking(move |tab| {
            let content = tab
                .get_content()
                .map_err(|e| format!("Get page content failed: {}", e))?;
            let text = html_to_text(&content);
            if text.chars().count() > max_chars {
                Ok(text.chars().take(max_chars).collect::<String>() + "\n...[truncated]")
            } else {
                Ok(text)
            }
        })
        .await
    }

    async fn hyperlinks(&self) -> Result<Vec<String>, String> {
        self.blocking(|tab| {
            let content = tab
                .get_content()
                .map_err(|e| format!("Get page content failed: {}", e))?;
            Ok(extract_links(&content, &tab.get_url()))
        })
        .await
    }

    async fn close(&self) -> Result<(), String> {
        let browser = self.browser.clone();
        self.blocking(move |tab| {
            tab.close(true)
                .map_err(|e| format!("Browser tab close failed: {}", e))?;
            drop(browser);
            Ok(())
        })
        .await
    }
}

/// 每个线程启动独立的 headless Chrome
pub struct ChromeBrowserFactory {
    headless: bool,
    max_chars: usize,
}

impl ChromeBrowserFactory {
    pub fn new(headless: bool, max_chars: usize) -> Self {
        Self { headless, max_chars }
    }
}

#[async_trait]
impl ResourceFactory for ChromeBrowserFactory {
    async fn create(&self, thread_id: &str) -> Result<Arc<dyn BrowserSession>, String> {
        let headless = self.headless;
        let max_chars = self.max_chars;
        let session = tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .build()
                .map_err(|e| format!("Chrome launch options: {}", e))?;
            let browser = Browser::new(options)
                .map_err(|e| format!("Chrome launch failed: {}. Install Chrome/Chromium.", e))?;
            let tab = browser
                .new_tab()
                .map_err(|e| format!("Browser tab failed: {}", e))?;
            Ok::<_, String>(ChromeSession {
                browser,
                tab,
                max_chars,
            })
        })
        .await
        .map_err(|e| format!("Task join: {}", e))??;
        tracing::info!(thread_id = %thread_id, "headless chrome session launched");
        Ok(Arc::new(session))
    }
}
