//! Tool Dispatcher
//!
//! 共享的无状态工具（search / wikipedia / push / 文件）启动时注册一次；浏览器工具绑定到线程资源，
//! 首次调用时才经 ResourceManager 创建会话。每次调用受工具超时约束并输出 JSON 审计日志；
//! execute_all 并发执行一批调用，按请求顺序返回结果，失败转为错误型 tool 消息，不向上抛出。
//! 浏览器工具失败且命中资源特征（或超时）时，该线程的浏览器会话在本批结束后重启一次。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;

use crate::core::{with_timeout, FaultClassifier, SidekickError};
use crate::memory::{Message, ToolCall};
use crate::tools::browser::toolkit_specs;
use crate::tools::resource::ResourceManager;
use crate::tools::{ToolRegistry, ToolSpec};

pub struct ToolDispatcher {
    shared: ToolRegistry,
    resources: Arc<ResourceManager>,
    resource_specs: Vec<ToolSpec>,
    timeout: Duration,
    classifier: Option<Arc<FaultClassifier>>,
}

impl ToolDispatcher {
    pub fn new(shared: ToolRegistry, resources: Arc<ResourceManager>, timeout: Duration) -> Self {
        let resource_specs = toolkit_specs()
            .into_iter()
            .filter(|spec| !shared.contains(&spec.name))
            .collect();
        Self {
            shared,
            resources,
            resource_specs,
            timeout,
            classifier: None,
        }
    }

    /// 启用资源故障后的自动重启
    pub fn with_fault_classifier(mut self, classifier: Arc<FaultClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 全部工具描述；不会创建任何资源
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.shared.specs();
        specs.extend(self.resource_specs.iter().cloned());
        specs
    }

    fn is_resource_tool(&self, name: &str) -> bool {
        self.resource_specs.iter().any(|s| s.name == name)
    }

    /// 线程可用的完整工具集（会创建该线程的资源）
    pub async fn tools_for(&self, thread_id: &str) -> Result<ToolRegistry, SidekickError> {
        let entry = self.resources.get_or_create(thread_id).await?;
        let mut registry = self.shared.clone();
        registry.merge(&entry.tools);
        Ok(registry)
    }

    async fn run(&self, thread_id: &str, call: &ToolCall) -> Result<String, SidekickError> {
        if let Some(error) = &call.argument_error {
            return Err(SidekickError::ToolFailed {
                name: call.name.clone(),
                message: format!("Invalid arguments (not valid JSON): {}", error),
            });
        }
        if let Some(tool) = self.shared.get(&call.name) {
            return tool
                .execute(call.arguments.clone())
                .await
                .map_err(|message| SidekickError::ToolFailed {
                    name: call.name.clone(),
                    message,
                });
        }
        if !self.is_resource_tool(&call.name) {
            return Err(SidekickError::UnknownTool {
                name: call.name.clone(),
            });
        }
        let entry = self.resources.get_or_create(thread_id).await?;
        let tool = entry
            .tools
            .get(&call.name)
            .ok_or_else(|| SidekickError::UnknownTool {
                name: call.name.clone(),
            })?;
        tool.execute(call.arguments.clone())
            .await
            .map_err(SidekickError::ResourceFault)
    }

    /// 执行单个调用；超时返回 TimeoutExceeded（operation = "tool:<name>"）
    pub async fn invoke(&self, thread_id: &str, call: &ToolCall) -> Result<String, SidekickError> {
        let start = Instant::now();
        let operation = format!("tool:{}", call.name);
        let result = with_timeout(&operation, self.timeout, self.run(thread_id, call))
            .await
            .and_then(|r| r);

        let (ok, outcome): (bool, &str) = match &result {
            Ok(_) => (true, "ok"),
            Err(e) if e.is_timeout() => (false, "timeout"),
            Err(SidekickError::UnknownTool { .. }) => (false, "unknown_tool"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "thread_id": thread_id,
            "tool": call.name,
            "call_id": call.id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    /// 浏览器工具的失败是否说明会话已不可用
    fn is_resource_fault(&self, call: &ToolCall, err: &SidekickError) -> bool {
        let Some(classifier) = &self.classifier else {
            return false;
        };
        if !self.is_resource_tool(&call.name) {
            return false;
        }
        match err {
            SidekickError::ResourceFault(message) => classifier.matches_signature(message),
            e => e.is_timeout(),
        }
    }

    /// 并发执行一批调用，结果与请求一一对应且保持顺序
    pub async fn execute_all(&self, thread_id: &str, calls: &[ToolCall]) -> Vec<Message> {
        let results = join_all(calls.iter().map(|call| self.invoke(thread_id, call))).await;

        let faulted = calls
            .iter()
            .zip(&results)
            .any(|(call, result)| matches!(result, Err(e) if self.is_resource_fault(call, e)));
        if faulted {
            tracing::info!(thread_id = %thread_id, "detected browser error, attempting restart");
            match self.resources.restart(thread_id).await {
                Ok(_) => tracing::info!(thread_id = %thread_id, "browser restarted successfully"),
                Err(e) => {
                    tracing::error!(thread_id = %thread_id, error = %e, "failed to restart browser")
                }
            }
        }

        calls
            .iter()
            .zip(results)
            .map(|(call, result)| match result {
                Ok(content) => Message::tool_result(call, content),
                Err(e) => {
                    tracing::warn!(thread_id = %thread_id, tool = %call.name, error = %e, "tool call failed");
                    Message::tool_error(call, e)
                }
            })
            .collect()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
