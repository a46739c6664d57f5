//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Scripted）实现 LlmClient：输入完整对话与可用工具描述，
//! 返回一条 assistant 消息（可能携带工具调用）。

use async_trait::async_trait;

use crate::memory::Message;
use crate::tools::ToolSpec;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tools 为空时不向模型声明工具
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, String>;

    fn model_name(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
