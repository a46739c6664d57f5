//! Sidekick 错误类型与故障分类
//!
//! 与 FaultContainment 配合：节点内抛出的 SidekickError 先交给恢复处理器，
//! 未被认领时按 ErrorClass 生成诊断消息并终止本轮任务。

use std::time::Duration;

use thiserror::Error;

/// 状态机运行过程中可能出现的错误（超时、资源、未知工具、评估解析等）
#[derive(Error, Debug)]
pub enum SidekickError {
    /// 受 Timeout Guard 约束的操作未在时限内完成
    #[error("{operation} exceeded {}s timeout", duration.as_secs_f64())]
    TimeoutExceeded { operation: String, duration: Duration },

    /// 外部资源（浏览器会话）初始化失败
    #[error("Resource init failed: {0}")]
    ResourceInit(String),

    /// 外部资源使用中失败
    #[error("Resource fault: {0}")]
    ResourceFault(String),

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// 工具自身返回的错误
    #[error("Tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    /// 评估模型输出无法解析为 verdict schema
    #[error("Evaluation schema error: {0}")]
    EvaluationSchema(String),

    /// 节点内其它错误
    #[error("Error in '{node}': {message}")]
    Transition { node: String, message: String },

    #[error("LLM error: {0}")]
    Llm(String),

    /// 检查点读写或解码失败（唯一允许传播给调用方的错误）
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl SidekickError {
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::TimeoutExceeded {
            operation: operation.into(),
            duration,
        }
    }

    pub fn transition(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transition {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }
}

/// 故障分类：决定诊断消息的措辞与是否需要重启资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Timeout,
    /// 浏览器/资源操作超时
    ResourceTimeout,
    Resource,
    Generic,
}

impl ErrorClass {
    pub fn is_resource(&self) -> bool {
        matches!(self, ErrorClass::Resource | ErrorClass::ResourceTimeout)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::ResourceTimeout => "resource_timeout",
            ErrorClass::Resource => "resource",
            ErrorClass::Generic => "generic",
        };
        f.write_str(s)
    }
}
