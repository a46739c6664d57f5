//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、DeepSeek、自建代理等。
//! 工具以 function 形式声明；返回的 arguments 不是合法 JSON 时保留原文并记下解析错误，由 Dispatcher 回报给 Worker。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role, ToolCall, NO_CONTENT};
use crate::tools::ToolSpec;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!(model = %model, "OPENAI_API_KEY not set, requests will likely be rejected");
        }

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }
}

fn to_openai_tool_calls(calls: &[ToolCall]) -> Vec<ChatCompletionMessageToolCalls> {
    calls
        .iter()
        .map(|tc| {
            ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                id: tc.id.clone(),
                function: FunctionCall {
                    name: tc.name.clone(),
                    arguments: tc.raw_arguments(),
                },
            })
        })
        .collect()
}

/// 内部消息转为 API 请求消息
fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, String> {
    let message = match m.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(m.content.clone())
            .build()
            .map(ChatCompletionRequestMessage::System),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(m.content.clone())
            .build()
            .map(ChatCompletionRequestMessage::User),
        Role::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            // 只含工具调用的 assistant 消息不带 content
            if !(m.has_tool_calls() && m.content.is_empty()) {
                args.content(m.content.clone());
            }
            if m.has_tool_calls() {
                args.tool_calls(to_openai_tool_calls(&m.tool_calls));
            }
            args.build().map(ChatCompletionRequestMessage::Assistant)
        }
        Role::Tool => ChatCompletionRequestToolMessageArgs::default()
            .content(m.content.clone())
            .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
            .build()
            .map(ChatCompletionRequestMessage::Tool),
    };
    message.map_err(|e| e.to_string())
}

fn to_openai_tools(tools: &[ToolSpec]) -> Result<Vec<ChatCompletionTools>, String> {
    tools
        .iter()
        .map(|t| {
            let function = FunctionObjectArgs::default()
                .name(t.name.clone())
                .description(t.description.clone())
                .parameters(t.parameters.clone())
                .build()
                .map_err(|e| e.to_string())?;
            Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
        })
        .collect()
}

/// 将 API 响应转为内部 assistant 消息
fn into_message(message: ChatCompletionResponseMessage) -> Message {
    let content = message.content.unwrap_or_default();
    let tool_calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| match tc {
            ChatCompletionMessageToolCalls::Function(call) => Some(ToolCall::from_raw_arguments(
                call.id,
                call.function.name,
                &call.function.arguments,
            )),
            _ => {
                tracing::warn!("ignoring custom tool call, only function tools are declared");
                None
            }
        })
        .collect();
    for call in tool_calls.iter().filter(|c| c.argument_error.is_some()) {
        tracing::warn!(tool = %call.name, call_id = %call.id, "tool call arguments are not valid JSON");
    }
    if tool_calls.is_empty() && content.trim().is_empty() {
        return Message::assistant(NO_CONTENT);
    }
    Message::assistant_with_tools(content, tool_calls)
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, String> {
        let openai_messages = messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(openai_messages);
        if !tools.is_empty() {
            args.tools(to_openai_tools(tools)?);
        }
        let request = args.build().map_err(|e| e.to_string())?;
        tracing::debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "chat completion request");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "No choices in response".to_string())?;
        Ok(into_message(choice.message))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[cfg(test)]
mod tests {
    use async_openai::types::chat::CreateChatCompletionResponse;

    use super::*;

    fn response_message(body: &str) -> ChatCompletionResponseMessage {
        let parsed: CreateChatCompletionResponse = serde_json::from_str(body).unwrap();
        parsed.choices.into_iter().next().unwrap().message
    }

    const TOOL_CALL_RESPONSE: &str = r#"{
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "search", "arguments": "ARGS"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }"#;

    #[test]
    fn test_response_with_tool_calls() {
        let body = TOOL_CALL_RESPONSE.replace("ARGS", r#"{\"query\":\"X\"}"#);
        let msg = into_message(response_message(&body));
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].arguments["query"], "X");
        assert!(msg.tool_calls[0].argument_error.is_none());
    }

    #[test]
    fn test_malformed_arguments_kept_with_error() {
        let body = TOOL_CALL_RESPONSE.replace("ARGS", r#"{\"query\": "#);
        let msg = into_message(response_message(&body));
        let call = &msg.tool_calls[0];
        assert!(call.argument_error.is_some());
        assert_eq!(call.raw_arguments(), r#"{"query": "#);
    }

    #[test]
    fn test_tool_messages_convert() {
        let call = ToolCall::new("call_1", "search", serde_json::json!({"query": "X"}));
        let assistant = to_openai_message(&Message::assistant_with_tools("", vec![call.clone()])).unwrap();
        let json = serde_json::to_value(&assistant).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["tool_calls"][0]["function"]["arguments"], r#"{"query":"X"}"#);

        let result = to_openai_message(&Message::tool_result(&call, "ok")).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
    }

    #[test]
    fn test_tools_declared_as_functions() {
        let spec = ToolSpec {
            name: "search".to_string(),
            description: "Search the web".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };
        let tools = to_openai_tools(&[spec]).unwrap();
        let json = serde_json::to_value(&tools).unwrap();
        assert_eq!(json[0]["type"], "function");
        assert_eq!(json[0]["function"]["name"], "search");
    }
}
