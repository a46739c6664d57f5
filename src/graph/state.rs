//! 任务状态与局部更新
//!
//! TaskState 只由图节点通过 StateUpdate 修改；消息只追加，唯一例外是 system 指令：
//! 始终位于下标 0，且整个历史中至多一条。

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

/// 状态机节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Worker,
    Tools,
    Evaluator,
    Terminal,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Worker => "worker",
            Node::Tools => "tools",
            Node::Evaluator => "evaluator",
            Node::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 评估结论（每次 Evaluator 步骤产生一个，不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationVerdict {
    /// Feedback on the assistant's response
    pub feedback: String,
    /// Whether the success criteria have been achieved
    pub success_criteria_met: bool,
    /// True if more input is needed from the user, or clarifications, or the assistant is stuck
    pub user_input_needed: bool,
}

/// 单个线程的任务状态（检查点的内容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub success_criteria: String,
    pub feedback_on_work: Option<String>,
    pub success_criteria_met: bool,
    pub user_input_needed: bool,
    /// 连续相同驳回反馈的次数
    #[serde(default)]
    pub repeated_feedback: u32,
}

impl TaskState {
    pub fn new(thread_id: impl Into<String>, success_criteria: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            success_criteria: success_criteria.into(),
            feedback_on_work: None,
            success_criteria_met: false,
            user_input_needed: false,
            repeated_feedback: 0,
        }
    }

    /// 开始新一轮：追加用户消息、替换成功标准、清空上轮反馈与终止标志
    pub fn begin_turn(&mut self, user_message: &str, success_criteria: &str) {
        self.close_pending_tool_calls("the previous turn ended before this tool call completed");
        self.messages.push(Message::user(user_message));
        self.success_criteria = success_criteria.to_string();
        self.feedback_on_work = None;
        self.success_criteria_met = false;
        self.user_input_needed = false;
        self.repeated_feedback = 0;
    }

    pub fn is_terminal(&self) -> bool {
        self.success_criteria_met || self.user_input_needed
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 为最后一条 assistant 消息中尚无结果的工具调用补上错误型 tool 消息，返回补齐的数量
    pub fn close_pending_tool_calls(&mut self, reason: &str) -> usize {
        let Some(idx) = self.messages.iter().rposition(|m| m.role == Role::Assistant) else {
            return 0;
        };
        let answered: Vec<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let pending: Vec<Message> = self.messages[idx]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(&call.id.as_str()))
            .map(|call| Message::tool_error(call, reason))
            .collect();
        let count = pending.len();
        self.messages.extend(pending);
        count
    }

    /// 最近一条 assistant 消息
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// 去掉 system 指令后的对话
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    pub fn system_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::System).count()
    }

    /// 安装 system 指令：移除已有的 system 消息并插入到下标 0
    pub fn set_system_message(&mut self, directive: Message) {
        self.messages.retain(|m| m.role != Role::System);
        self.messages.insert(0, directive);
    }

    /// 合并节点返回的局部更新
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(directive) = update.system {
            self.set_system_message(directive);
        }
        for msg in update.messages {
            if msg.role == Role::System {
                self.set_system_message(msg);
            } else {
                self.messages.push(msg);
            }
        }
        if let Some(feedback) = update.feedback_on_work {
            self.feedback_on_work = Some(feedback);
        }
        if let Some(met) = update.success_criteria_met {
            self.success_criteria_met = met;
        }
        if let Some(needed) = update.user_input_needed {
            self.user_input_needed = needed;
        }
        if let Some(repeated) = update.repeated_feedback {
            self.repeated_feedback = repeated;
        }
    }
}

/// 节点返回的局部更新；None 字段保持原值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub system: Option<Message>,
    pub messages: Vec<Message>,
    pub feedback_on_work: Option<String>,
    pub success_criteria_met: Option<bool>,
    pub user_input_needed: Option<bool>,
    pub repeated_feedback: Option<u32>,
}

impl StateUpdate {
    pub fn message(msg: Message) -> Self {
        Self {
            messages: vec![msg],
            ..Default::default()
        }
    }

    /// 诊断型终止：追加一条 assistant 消息并要求用户介入
    pub fn needs_user_input(diagnostic: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::assistant(diagnostic)],
            user_input_needed: Some(true),
            ..Default::default()
        }
    }

    pub fn from_verdict(verdict: &EvaluationVerdict, repeated_feedback: u32) -> Self {
        Self {
            messages: vec![Message::assistant(format!(
                "Evaluator Feedback on this answer: {}",
                verdict.feedback
            ))],
            feedback_on_work: Some(verdict.feedback.clone()),
            success_criteria_met: Some(verdict.success_criteria_met),
            user_input_needed: Some(verdict.user_input_needed),
            repeated_feedback: Some(repeated_feedback),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_replaced_not_duplicated() {
        let mut state = TaskState::new("t1", "a numeric answer");
        state.begin_turn("What is 2+2?", "a numeric answer");
        state.apply(StateUpdate {
            system: Some(Message::system("directive v1")),
            ..Default::default()
        });
        state.apply(StateUpdate {
            system: Some(Message::system("directive v2")),
            messages: vec![Message::assistant("4")],
            ..Default::default()
        });
        assert_eq!(state.system_message_count(), 1);
        assert_eq!(state.messages[0].content, "directive v2");
        assert_eq!(state.messages.len(), 3);
    }

    #[test]
    fn test_system_in_messages_still_single() {
        let mut state = TaskState::new("t1", "c");
        state.apply(StateUpdate::message(Message::system("a")));
        state.apply(StateUpdate::message(Message::system("b")));
        assert_eq!(state.system_message_count(), 1);
    }

    #[test]
    fn test_begin_turn_resets_flags() {
        let mut state = TaskState::new("t1", "old");
        state.feedback_on_work = Some("bad".to_string());
        state.success_criteria_met = true;
        state.repeated_feedback = 2;
        state.begin_turn("again", "new");
        assert!(!state.is_terminal());
        assert_eq!(state.feedback_on_work, None);
        assert_eq!(state.success_criteria, "new");
        assert_eq!(state.repeated_feedback, 0);
    }

    #[test]
    fn test_verdict_update_terminates() {
        let mut state = TaskState::new("t1", "c");
        let verdict = EvaluationVerdict {
            feedback: "Looks good".to_string(),
            success_criteria_met: true,
            user_input_needed: false,
        };
        state.apply(StateUpdate::from_verdict(&verdict, 0));
        assert!(state.is_terminal());
        assert_eq!(
            state.last_message().map(|m| m.content.as_str()),
            Some("Evaluator Feedback on this answer: Looks good")
        );
    }

    #[test]
    fn test_pending_tool_calls_closed_with_errors() {
        let mut state = TaskState::new("t1", "c");
        state.begin_turn("look it up", "c");
        let first = crate::memory::ToolCall::new("c1", "search", serde_json::json!({}));
        let second = crate::memory::ToolCall::new("c2", "wikipedia", serde_json::json!({}));
        state.messages.push(Message::assistant_with_tools("", vec![first.clone(), second]));
        state.messages.push(Message::tool_result(&first, "found"));

        assert_eq!(state.close_pending_tool_calls("interrupted"), 1);
        let last = state.last_message().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("c2"));
        assert!(last.is_error);
        assert_eq!(state.close_pending_tool_calls("interrupted"), 0);

        // 新一轮开始前也会补齐
        state.messages.push(Message::assistant_with_tools(
            "",
            vec![crate::memory::ToolCall::new("c3", "search", serde_json::json!({}))],
        ));
        state.begin_turn("next", "c");
        let roles: Vec<Role> = state.messages.iter().rev().take(2).map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Tool]);
    }
}
