//! 组装运行时：按 AppConfig 构建 LLM、工具、资源管理、检查点存储与 SessionCoordinator
//!
//! 供 sidekick 二进制与集成方调用；所有组件显式传递，没有全局单例。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, BrowserBackend, CheckpointBackend};
use crate::core::{
    FaultClassifier, FaultContainment, ResourceRestartHandler, SessionCoordinator, SidekickError,
};
use crate::graph::{Evaluator, GraphLimits, OrchestrationGraph, Worker};
use crate::llm::{LlmClient, OpenAiClient, ScriptedLlmClient};
use crate::memory::{
    CheckpointStore, InMemoryCheckpointStore, JsonFileCheckpointStore, Message,
    SqliteCheckpointStore,
};
use crate::tools::{
    file_toolkit, HttpBrowserFactory, PushNotificationTool, PythonReplTool, ResourceFactory,
    ResourceManager, ResourceTimeouts, SerperSearchTool, ToolDispatcher, ToolRegistry,
    WikipediaTool,
};

const OFFLINE_REPLY: &str =
    "Sidekick is running without a language model (llm.provider = \"scripted\"). Configure an OpenAI-compatible provider to get real answers.";
const OFFLINE_VERDICT: &str = r#"{"feedback": "No evaluator model is configured.", "success_criteria_met": false, "user_input_needed": true}"#;

/// 构建 Worker 与 Evaluator 使用的模型客户端
pub fn create_llm_clients(cfg: &AppConfig) -> (Arc<dyn LlmClient>, Arc<dyn LlmClient>) {
    match cfg.llm.provider.as_str() {
        "scripted" | "offline" => {
            tracing::warn!("llm.provider = scripted, running offline");
            let worker: Arc<dyn LlmClient> = Arc::new(
                ScriptedLlmClient::new(vec![]).with_fallback(Message::assistant(OFFLINE_REPLY)),
            );
            let evaluator: Arc<dyn LlmClient> = Arc::new(
                ScriptedLlmClient::new(vec![]).with_fallback(Message::assistant(OFFLINE_VERDICT)),
            );
            (worker, evaluator)
        }
        other => {
            if other != "openai" {
                tracing::info!(provider = %other, "treating provider as OpenAI-compatible");
            }
            let base_url = cfg.llm.base_url.as_deref();
            let worker: Arc<dyn LlmClient> =
                Arc::new(OpenAiClient::new(base_url, &cfg.llm.model, None));
            let evaluator: Arc<dyn LlmClient> =
                Arc::new(OpenAiClient::new(base_url, cfg.llm.evaluator_model(), None));
            (worker, evaluator)
        }
    }
}

/// 启动时注册一次的无状态工具；缺少 API Key 的工具跳过
pub fn create_shared_tools(cfg: &AppConfig) -> ToolRegistry {
    let mut tools = file_toolkit(&cfg.app.workspace_root);
    tools.register(WikipediaTool::new(&cfg.tools.wikipedia));
    if cfg.tools.python.enabled {
        tools.register(PythonReplTool::new(&cfg.tools.python, &cfg.app.workspace_root));
    }
    match SerperSearchTool::from_env(&cfg.tools.search) {
        Some(search) => tools.register(search),
        None => tracing::warn!("SERPER_API_KEY not set, search tool disabled"),
    }
    match PushNotificationTool::from_env(&cfg.tools.push) {
        Some(push) => tools.register(push),
        None => tracing::warn!("PUSHOVER_TOKEN / PUSHOVER_USER not set, push tool disabled"),
    }
    tools
}

pub fn create_resource_factory(cfg: &AppConfig) -> Arc<dyn ResourceFactory> {
    let browser = &cfg.tools.browser;
    let factory: Arc<dyn ResourceFactory> = match browser.backend {
        BrowserBackend::Http => Arc::new(HttpBrowserFactory::new(
            browser.user_agent.clone(),
            cfg.timeouts.browser(),
            browser.max_result_chars,
        )),
        #[cfg(feature = "browser")]
        BrowserBackend::Chrome => Arc::new(crate::tools::ChromeBrowserFactory::new(
            browser.headless,
            browser.max_result_chars,
        )),
        #[cfg(not(feature = "browser"))]
        BrowserBackend::Chrome => {
            tracing::warn!("chrome backend requires the `browser` feature, falling back to http");
            Arc::new(HttpBrowserFactory::new(
                browser.user_agent.clone(),
                cfg.timeouts.browser(),
                browser.max_result_chars,
            ))
        }
    };
    factory
}

pub fn create_checkpoint_store(cfg: &AppConfig) -> Result<Arc<dyn CheckpointStore>, SidekickError> {
    let section = &cfg.app.checkpoint;
    let store: Arc<dyn CheckpointStore> = match section.backend {
        CheckpointBackend::Memory => Arc::new(InMemoryCheckpointStore::new()),
        CheckpointBackend::File => {
            let dir = section
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from("data/checkpoints"));
            Arc::new(JsonFileCheckpointStore::new(dir))
        }
        CheckpointBackend::Sqlite => {
            let path = section
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from("data/checkpoints.db"));
            Arc::new(SqliteCheckpointStore::open(path)?)
        }
    };
    Ok(store)
}

/// 由已构建的组件装配 SessionCoordinator
pub fn assemble(
    cfg: &AppConfig,
    worker_llm: Arc<dyn LlmClient>,
    evaluator_llm: Arc<dyn LlmClient>,
    shared_tools: ToolRegistry,
    factory: Arc<dyn ResourceFactory>,
    store: Arc<dyn CheckpointStore>,
) -> Result<SessionCoordinator, SidekickError> {
    let resources = Arc::new(ResourceManager::new(
        factory,
        ResourceTimeouts {
            create: cfg.timeouts.resource_create(),
            teardown: cfg.timeouts.resource_teardown(),
            operation: cfg.timeouts.browser(),
        },
    ));
    let classifier = Arc::new(FaultClassifier::new(&cfg.recovery.resource_signatures)?);
    let dispatcher = Arc::new(
        ToolDispatcher::new(shared_tools, Arc::clone(&resources), cfg.timeouts.tool())
            .with_fault_classifier(Arc::clone(&classifier)),
    );

    let containment = FaultContainment::new(Arc::clone(&classifier)).with_handler(Arc::new(
        ResourceRestartHandler::new(Arc::clone(&resources), classifier),
    ));

    let llm_timeout: Duration = cfg.llm.request_timeout();
    let graph = OrchestrationGraph::new(
        Worker::new(worker_llm, llm_timeout),
        Evaluator::new(evaluator_llm, llm_timeout, cfg.graph.repeated_feedback_limit),
        dispatcher,
        containment,
        GraphLimits {
            max_steps: cfg.graph.max_steps,
            graph_timeout: cfg.timeouts.graph(),
        },
    );

    Ok(SessionCoordinator::new(Arc::new(graph), store, resources))
}

/// 按配置构建完整运行时
pub fn create_coordinator(cfg: &AppConfig) -> Result<SessionCoordinator, SidekickError> {
    cfg.validate()?;
    let (worker_llm, evaluator_llm) = create_llm_clients(cfg);
    let tools = create_shared_tools(cfg);
    tracing::info!(tools = ?tools.tool_names(), "shared tools registered");
    assemble(
        cfg,
        worker_llm,
        evaluator_llm,
        tools,
        create_resource_factory(cfg),
        create_checkpoint_store(cfg)?,
    )
}
