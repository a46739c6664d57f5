//! Scripted LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序返回预置回复（可带延迟或错误），并记录每次收到的消息，便于断言调用次数与提示内容；
//! 回复耗尽后返回 fallback，未设置 fallback 时报错。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, ToolCall};
use crate::tools::ToolSpec;

/// 一条预置回复
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub delay: Option<Duration>,
    pub result: Result<Message, String>,
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            delay: None,
            result: Ok(Message::assistant(content)),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            delay: None,
            result: Ok(Message::assistant_with_tools("", calls)),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay: None,
            result: Err(message.into()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Scripted 客户端：依次弹出预置回复
pub struct ScriptedLlmClient {
    model: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<Message>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            model: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 回复耗尽后反复返回的消息
    pub fn with_fallback(mut self, fallback: Message) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// 已收到的调用次数
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 每次调用收到的完整消息列表
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<Message, String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| format!("scripted replies poisoned: {}", e))?
            .pop_front();
        match next {
            Some(reply) => {
                if let Some(delay) = reply.delay {
                    tokio::time::sleep(delay).await;
                }
                reply.result
            }
            None => self
                .fallback
                .clone()
                .ok_or_else(|| "scripted replies exhausted".to_string()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
