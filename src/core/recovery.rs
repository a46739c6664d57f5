//! Fault Containment：节点错误的统一收口
//!
//! 节点返回的错误先依次交给已注册的 RecoveryHandler（出错的处理器记日志后跳过），
//! 无处理器认领时按 ErrorClass 合成一条诊断 assistant 消息并置 user_input_needed = true。
//! ResourceRestartHandler 在资源类错误时重启该线程的浏览器会话，随后仍交给默认诊断。

use std::sync::Arc;

use async_trait::async_trait;
use regex::{RegexSet, RegexSetBuilder};

use crate::core::{ErrorClass, SidekickError};
use crate::graph::{StateUpdate, TaskState};
use crate::tools::ResourceManager;

/// 处理器结论
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// 已处理，直接合并给出的更新
    Handled(StateUpdate),
    /// 交给后续处理器或默认诊断
    Unhandled,
}

#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        err: &SidekickError,
        state: &TaskState,
        node: &str,
    ) -> Result<RecoveryOutcome, SidekickError>;
}

/// 错误分类器：类型化错误优先，其余按特征正则匹配错误文本
#[derive(Debug)]
pub struct FaultClassifier {
    signatures: RegexSet,
}

impl FaultClassifier {
    pub fn new(patterns: &[String]) -> Result<Self, SidekickError> {
        let signatures = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| SidekickError::Config(format!("invalid resource signature: {}", e)))?;
        Ok(Self { signatures })
    }

    /// 错误文本是否命中资源特征
    pub fn matches_signature(&self, text: &str) -> bool {
        self.signatures.is_match(text)
    }

    pub fn classify(&self, err: &SidekickError) -> ErrorClass {
        match err {
            SidekickError::TimeoutExceeded { operation, .. } => {
                if operation.starts_with("browser:") || operation.starts_with("resource:") {
                    ErrorClass::ResourceTimeout
                } else {
                    ErrorClass::Timeout
                }
            }
            SidekickError::ResourceInit(_) | SidekickError::ResourceFault(_) => ErrorClass::Resource,
            other if self.signatures.is_match(&other.to_string()) => ErrorClass::Resource,
            _ => ErrorClass::Generic,
        }
    }
}

/// 默认诊断文本
pub fn diagnostic(class: ErrorClass, err: &SidekickError, node: &str) -> String {
    match class {
        ErrorClass::Timeout => format!(
            "Operation in '{}' timed out. Please try again with a simpler request.",
            node
        ),
        ErrorClass::ResourceTimeout => format!(
            "Browser operation in '{}' timed out. The page might be too slow to load.",
            node
        ),
        ErrorClass::Resource | ErrorClass::Generic => {
            format!("An error occurred in '{}': {}", node, err)
        }
    }
}

pub struct FaultContainment {
    classifier: Arc<FaultClassifier>,
    handlers: Vec<Arc<dyn RecoveryHandler>>,
}

impl FaultContainment {
    pub fn new(classifier: Arc<FaultClassifier>) -> Self {
        Self {
            classifier,
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn classifier(&self) -> &Arc<FaultClassifier> {
        &self.classifier
    }

    /// 把错误转为状态更新；不会失败
    pub async fn contain(&self, err: SidekickError, state: &TaskState, node: &str) -> StateUpdate {
        tracing::error!(thread_id = %state.thread_id, node = %node, error = %err, "error in node");

        for handler in &self.handlers {
            match handler.handle(&err, state, node).await {
                Ok(RecoveryOutcome::Handled(update)) => {
                    tracing::info!(handler = %handler.name(), node = %node, "error handled by recovery handler");
                    return update;
                }
                Ok(RecoveryOutcome::Unhandled) => {}
                Err(handler_err) => {
                    tracing::error!(handler = %handler.name(), error = %handler_err, "error handler failed");
                }
            }
        }

        let class = self.classifier.classify(&err);
        StateUpdate::needs_user_input(diagnostic(class, &err, node))
    }
}

/// 资源类错误时重启该线程的浏览器会话，仍返回 Unhandled 以便用户看到诊断
pub struct ResourceRestartHandler {
    resources: Arc<ResourceManager>,
    classifier: Arc<FaultClassifier>,
}

impl ResourceRestartHandler {
    pub fn new(resources: Arc<ResourceManager>, classifier: Arc<FaultClassifier>) -> Self {
        Self {
            resources,
            classifier,
        }
    }
}

#[async_trait]
impl RecoveryHandler for ResourceRestartHandler {
    fn name(&self) -> &str {
        "resource_restart"
    }

    async fn handle(
        &self,
        err: &SidekickError,
        state: &TaskState,
        node: &str,
    ) -> Result<RecoveryOutcome, SidekickError> {
        if !self.classifier.classify(err).is_resource() {
            return Ok(RecoveryOutcome::Unhandled);
        }
        tracing::info!(thread_id = %state.thread_id, node = %node, "detected browser error, attempting restart");
        match self.resources.restart(&state.thread_id).await {
            Ok(_) => {
                tracing::info!(thread_id = %state.thread_id, "browser restarted successfully")
            }
            Err(e) => {
                tracing::error!(thread_id = %state.thread_id, error = %e, "failed to restart browser")
            }
        }
        Ok(RecoveryOutcome::Unhandled)
    }
}
