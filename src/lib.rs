//! Sidekick - 自主任务执行循环
//!
//! 模块划分：
//! - **agent**: 按配置组装运行时（LLM、工具、资源、检查点、协调器）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、Timeout Guard、Fault Containment、Session Coordinator
//! - **graph**: 任务状态与 Worker / Tools / Evaluator 状态机
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）
//! - **memory**: 对话消息与检查点存储
//! - **observability**: tracing 初始化
//! - **tools**: 工具注册表、浏览器资源管理、Tool Dispatcher 与各工具

pub mod agent;
pub mod config;
pub mod core;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{SessionCoordinator, SidekickError};
pub use crate::graph::TaskState;
