//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SIDEKICK__*` 覆盖（双下划线表示嵌套，如 `SIDEKICK__TIMEOUTS__TOOL_SECS=30`）。
//! API Key 不放在配置文件中，从环境变量读取（OPENAI_API_KEY / SERPER_API_KEY / PUSHOVER_TOKEN / PUSHOVER_USER）。

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::core::SidekickError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub timeouts: TimeoutsSection,
    pub graph: GraphSection,
    pub recovery: RecoverySection,
    pub tools: ToolsSection,
}

/// [app] 段：沙箱目录与检查点存储
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 文件工具的沙箱根目录
    pub workspace_root: PathBuf,
    pub checkpoint: CheckpointSection,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "sidekick".to_string(),
            workspace_root: PathBuf::from("sandbox"),
            checkpoint: CheckpointSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

/// [app.checkpoint] 段：memory / file（目录）/ sqlite（数据库文件）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CheckpointSection {
    pub backend: CheckpointBackend,
    pub path: Option<PathBuf>,
}

/// [llm] 段：后端、模型与请求超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容接口）或 scripted（离线，固定回复）
    pub provider: String,
    pub model: String,
    /// 评估者模型，未设置时与 model 相同
    pub evaluator_model: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            evaluator_model: None,
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn evaluator_model(&self) -> &str {
        self.evaluator_model.as_deref().unwrap_or(&self.model)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// [timeouts] 段（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    /// 单次工具调用
    pub tool_secs: u64,
    /// 整个图调用（须大于 tool_secs）
    pub graph_secs: u64,
    /// 单次浏览器操作
    pub browser_secs: u64,
    pub resource_create_secs: u64,
    pub resource_teardown_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            tool_secs: 60,
            graph_secs: 120,
            browser_secs: 30,
            resource_create_secs: 30,
            resource_teardown_secs: 10,
        }
    }
}

impl TimeoutsSection {
    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }

    pub fn graph(&self) -> Duration {
        Duration::from_secs(self.graph_secs)
    }

    pub fn browser(&self) -> Duration {
        Duration::from_secs(self.browser_secs)
    }

    pub fn resource_create(&self) -> Duration {
        Duration::from_secs(self.resource_create_secs)
    }

    pub fn resource_teardown(&self) -> Duration {
        Duration::from_secs(self.resource_teardown_secs)
    }
}

/// [graph] 段：步数上限与重复反馈上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub max_steps: usize,
    /// 连续相同驳回反馈达到该次数时强制请求用户介入
    pub repeated_feedback_limit: u32,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            max_steps: 25,
            repeated_feedback_limit: 3,
        }
    }
}

/// [recovery] 段：资源故障特征（正则，大小写不敏感）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub resource_signatures: Vec<String>,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            resource_signatures: vec![
                "browser".into(),
                "playwright".into(),
                "page".into(),
                "navigation".into(),
            ],
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    pub search: SearchSection,
    pub wikipedia: WikipediaSection,
    pub push: PushSection,
    pub python: PythonSection,
    pub browser: BrowserSection,
}

/// [tools.search] 段：Serper 搜索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub num_results: usize,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://google.serper.dev/search".to_string(),
            num_results: 10,
            timeout_secs: 15,
            max_result_chars: 8000,
        }
    }
}

/// [tools.wikipedia] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WikipediaSection {
    pub language: String,
    pub top_k: usize,
    pub max_chars: usize,
    pub timeout_secs: u64,
}

impl Default for WikipediaSection {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            top_k: 3,
            max_chars: 4000,
            timeout_secs: 15,
        }
    }
}

/// [tools.python] 段：Python 代码执行（工作目录为 workspace_root）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PythonSection {
    pub enabled: bool,
    pub interpreter: String,
    pub timeout_secs: u64,
    pub max_output_chars: usize,
}

impl Default for PythonSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: "python3".to_string(),
            timeout_secs: 30,
            max_output_chars: 8000,
        }
    }
}

/// [tools.push] 段：Pushover 推送
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushSection {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pushover.net/1/messages.json".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserBackend {
    #[default]
    Http,
    Chrome,
}

/// [tools.browser] 段：会话后端（http / chrome）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub backend: BrowserBackend,
    pub headless: bool,
    pub user_agent: String,
    pub max_result_chars: usize,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            backend: BrowserBackend::Http,
            headless: true,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            max_result_chars: 8000,
        }
    }
}

impl AppConfig {
    /// 启动前检查：时限关系、步数、特征正则
    pub fn validate(&self) -> Result<(), SidekickError> {
        if self.timeouts.graph_secs <= self.timeouts.tool_secs {
            return Err(SidekickError::Config(format!(
                "timeouts.graph_secs ({}) must be larger than timeouts.tool_secs ({})",
                self.timeouts.graph_secs, self.timeouts.tool_secs
            )));
        }
        if self.graph.max_steps == 0 {
            return Err(SidekickError::Config("graph.max_steps must be > 0".to_string()));
        }
        if self.graph.repeated_feedback_limit == 0 {
            return Err(SidekickError::Config(
                "graph.repeated_feedback_limit must be > 0".to_string(),
            ));
        }
        for pattern in &self.recovery.resource_signatures {
            Regex::new(pattern).map_err(|e| {
                SidekickError::Config(format!("recovery.resource_signatures '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 SIDEKICK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SIDEKICK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SIDEKICK")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
