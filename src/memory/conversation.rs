//! 对话消息
//!
//! Message 按角色区分（user / assistant / system / tool）；assistant 消息可携带待执行的工具调用，
//! tool 消息通过 tool_call_id 与请求一一对应。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// assistant 回复既无正文也无工具调用时的占位内容
pub const NO_CONTENT: &str = "[no content]";

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// assistant 消息中的一次工具调用请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    /// 模型给出的参数不是合法 JSON 时的解析错误；此时 arguments 保存原始字符串
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_error: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            argument_error: None,
        }
    }

    /// 由模型返回的 JSON 字符串参数构造
    pub fn from_raw_arguments(id: impl Into<String>, name: impl Into<String>, raw: &str) -> Self {
        let mut call = Self::new(id, name, Value::Null);
        if raw.trim().is_empty() {
            call.arguments = Value::Object(Default::default());
            return call;
        }
        match serde_json::from_str(raw) {
            Ok(arguments) => call.arguments = arguments,
            Err(e) => {
                call.arguments = Value::String(raw.to_string());
                call.argument_error = Some(e.to_string());
            }
        }
        call
    }

    /// 回传给模型的参数字符串（解析失败时原样返回）
    pub fn raw_arguments(&self) -> String {
        match (&self.arguments, &self.argument_error) {
            (Value::String(raw), Some(_)) => raw.clone(),
            (arguments, _) => arguments.to_string(),
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// tool 消息对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// tool 消息对应的工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// tool 消息是否为错误载荷
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// 携带工具调用的 assistant 消息
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::assistant(content);
        msg.tool_calls = tool_calls;
        msg
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(call.id.clone());
        msg.name = Some(call.name.clone());
        msg
    }

    /// 工具失败时的结果消息：内容为 "Error: ..."，is_error = true
    pub fn tool_error(call: &ToolCall, error: impl std::fmt::Display) -> Self {
        let mut msg = Self::tool_result(call, format!("Error: {}", error));
        msg.is_error = true;
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 是否应展示给终端用户：user 消息与有正文的 assistant 消息
    pub fn is_displayable(&self) -> bool {
        match self.role {
            Role::User => true,
            Role::Assistant => !self.content.trim().is_empty(),
            Role::System | Role::Tool => false,
        }
    }
}
