//! 集成测试公共设施：假浏览器、可控延迟的工具与按需装配的协调器

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use sidekick::core::{FaultClassifier, FaultContainment, ResourceRestartHandler, SessionCoordinator};
use sidekick::graph::{Evaluator, GraphLimits, OrchestrationGraph, Worker};
use sidekick::llm::{ScriptedLlmClient, ScriptedReply};
use sidekick::memory::{CheckpointStore, InMemoryCheckpointStore, ToolCall};
use sidekick::tools::{
    BrowserSession, ResourceFactory, ResourceManager, ResourceTimeouts, Tool, ToolDispatcher,
    ToolRegistry,
};

pub struct FakeSession {
    url: Mutex<String>,
    failure: Option<String>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<String, String> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        *self.url.lock().await = url.to_string();
        Ok(format!("Navigating to {} returned status code 200", url))
    }

    async fn current_url(&self) -> Result<String, String> {
        Ok(self.url.lock().await.clone())
    }

    async fn go_back(&self) -> Result<String, String> {
        Err("No previous page in history".to_string())
    }

    async fn page_text(&self) -> Result<String, String> {
        Ok(format!("Text of {}", self.url.lock().await))
    }

    async fn hyperlinks(&self) -> Result<Vec<String>, String> {
        Ok(vec![])
    }

    async fn close(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    navigation_failure: std::sync::Mutex<Option<String>>,
}

impl FakeFactory {
    /// 之后创建的会话导航时都返回该错误
    pub fn fail_navigation(&self, message: &str) {
        if let Ok(mut failure) = self.navigation_failure.lock() {
            *failure = Some(message.to_string());
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFactory for FakeFactory {
    async fn create(&self, _thread_id: &str) -> Result<Arc<dyn BrowserSession>, String> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let failure = self.navigation_failure.lock().ok().and_then(|f| f.clone());
        Ok(Arc::new(FakeSession {
            url: Mutex::new("about:blank".to_string()),
            failure,
        }))
    }

    async fn close(&self, handle: Arc<dyn BrowserSession>) -> Result<(), String> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        handle.close().await
    }
}

/// 睡眠 delay 后返回固定输出的工具
pub struct DelayedTool {
    pub name: &'static str,
    pub delay: Duration,
    pub output: String,
}

impl DelayedTool {
    pub fn new(name: &'static str, delay_ms: u64, output: impl Into<String>) -> Self {
        Self {
            name,
            delay: Duration::from_millis(delay_ms),
            output: output.into(),
        }
    }
}

#[async_trait]
impl Tool for DelayedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Test tool with a fixed delay"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

pub fn verdict(feedback: &str, met: bool, needed: bool) -> ScriptedReply {
    ScriptedReply::text(
        serde_json::json!({
            "feedback": feedback,
            "success_criteria_met": met,
            "user_input_needed": needed,
        })
        .to_string(),
    )
}

pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args)
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub tool_timeout: Duration,
    pub graph_timeout: Duration,
    pub llm_timeout: Duration,
    pub max_steps: usize,
    pub repeated_feedback_limit: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(5),
            graph_timeout: Duration::from_secs(20),
            llm_timeout: Duration::from_secs(10),
            max_steps: 25,
            repeated_feedback_limit: 3,
        }
    }
}

pub struct Harness {
    pub coordinator: Arc<SessionCoordinator>,
    pub worker: Arc<ScriptedLlmClient>,
    pub evaluator: Arc<ScriptedLlmClient>,
    pub factory: Arc<FakeFactory>,
    pub store: Arc<dyn CheckpointStore>,
}

impl Harness {
    pub fn new(worker: ScriptedLlmClient, evaluator: ScriptedLlmClient, tools: ToolRegistry) -> Self {
        Self::with(
            worker,
            evaluator,
            tools,
            Limits::default(),
            Arc::new(InMemoryCheckpointStore::new()),
        )
    }

    pub fn with(
        worker: ScriptedLlmClient,
        evaluator: ScriptedLlmClient,
        tools: ToolRegistry,
        limits: Limits,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let worker = Arc::new(worker);
        let evaluator = Arc::new(evaluator);
        let factory = Arc::new(FakeFactory::default());
        let resources = Arc::new(ResourceManager::new(
            factory.clone(),
            ResourceTimeouts::default(),
        ));
        let patterns: Vec<String> = ["browser", "playwright", "page", "navigation"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let classifier = Arc::new(FaultClassifier::new(&patterns).unwrap());
        let dispatcher = Arc::new(
            ToolDispatcher::new(tools, Arc::clone(&resources), limits.tool_timeout)
                .with_fault_classifier(Arc::clone(&classifier)),
        );
        let containment = FaultContainment::new(Arc::clone(&classifier)).with_handler(Arc::new(
            ResourceRestartHandler::new(Arc::clone(&resources), classifier),
        ));
        let graph = OrchestrationGraph::new(
            Worker::new(worker.clone(), limits.llm_timeout),
            Evaluator::new(
                evaluator.clone(),
                limits.llm_timeout,
                limits.repeated_feedback_limit,
            ),
            dispatcher,
            containment,
            GraphLimits {
                max_steps: limits.max_steps,
                graph_timeout: limits.graph_timeout,
            },
        );
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::new(graph),
            Arc::clone(&store),
            resources,
        ));
        Self {
            coordinator,
            worker,
            evaluator,
            factory,
            store,
        }
    }
}
