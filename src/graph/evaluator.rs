//! Evaluator 节点：让评估模型按成功标准审查 Worker 的最后回复
//!
//! 评估模型必须输出符合 EvaluationVerdict schema 的 JSON；解析失败按 EvaluationSchema 错误交给
//! Fault Containment。同一条驳回反馈连续出现 repeated_feedback_limit 次时强制要求用户介入。

use std::sync::Arc;
use std::time::Duration;

use schemars::schema_for;

use crate::core::{with_timeout, SidekickError};
use crate::graph::{EvaluationVerdict, StateUpdate, TaskState};
use crate::llm::LlmClient;
use crate::memory::{Message, Role, NO_CONTENT};

const SYSTEM_PROMPT: &str = "You are an evaluator that determines if a task has been completed successfully by an Assistant.
Assess the Assistant's last response based on the given criteria. Respond with your feedback, and with your decision on whether the success criteria has been met,
and whether more input is needed from the user.";

/// 把对话渲染成评估模型可读的纯文本；tool 与 system 消息不参与
pub fn format_conversation(messages: &[Message]) -> String {
    let mut out = String::from("Conversation history: \n\n");
    for msg in messages {
        match msg.role {
            Role::User => {
                out.push_str(&format!("User: {}\n", msg.content));
            }
            Role::Assistant => {
                let text = if msg.content.trim().is_empty() {
                    "[Tools use]"
                } else {
                    msg.content.as_str()
                };
                out.push_str(&format!("Assistant: {}\n", text));
            }
            Role::System | Role::Tool => {}
        }
    }
    out
}

/// 组装评估请求的 user 提示
pub fn build_prompt(state: &TaskState, last_response: &str) -> String {
    let mut prompt = format!(
        "You are evaluating a conversation between the User and Assistant. You decide what action to take based on the last response from the Assistant.

The entire conversation with the assistant, with the user's original request and all replies, is:
{}

The success criteria for this assignment is:
{}

And the final response from the Assistant that you are evaluating is:
{}

Respond with your feedback, and decide if the success criteria is met by this response.
Also, decide if more user input is required, either because the assistant has a question, needs clarification, or seems to be stuck and unable to answer without help.
",
        format_conversation(&state.messages),
        state.success_criteria,
        last_response
    );
    if let Some(feedback) = state.feedback_on_work.as_deref() {
        prompt.push_str(&format!(
            "Also, note that in a prior attempt from the Assistant, you provided this feedback: {}\n",
            feedback
        ));
        prompt.push_str(
            "If you're seeing the Assistant repeating the same mistakes, then consider responding that user input is required.\n",
        );
    }
    let schema = serde_json::to_string_pretty(&schema_for!(EvaluationVerdict)).unwrap_or_default();
    prompt.push_str(&format!(
        "\nRespond ONLY with a JSON object matching this schema:\n{}\n",
        schema
    ));
    prompt
}

/// 从模型输出中提取 verdict（```json 代码块或首个 `{` 到最后一个 `}`）
pub fn parse_verdict(output: &str) -> Result<EvaluationVerdict, SidekickError> {
    let trimmed = output.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start <= end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Err(SidekickError::EvaluationSchema(format!(
            "no JSON object in evaluator output: {}",
            trimmed.chars().take(200).collect::<String>()
        )));
    };
    serde_json::from_str(json_str)
        .map_err(|e| SidekickError::EvaluationSchema(format!("{}: {}", e, json_str)))
}

fn normalize_feedback(feedback: &str) -> String {
    feedback
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub struct Evaluator {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    repeated_feedback_limit: u32,
}

impl Evaluator {
    pub fn new(llm: Arc<dyn LlmClient>, llm_timeout: Duration, repeated_feedback_limit: u32) -> Self {
        Self {
            llm,
            llm_timeout,
            repeated_feedback_limit: repeated_feedback_limit.max(1),
        }
    }

    pub async fn run(&self, state: &TaskState) -> Result<StateUpdate, SidekickError> {
        let Some(last) = state.conversation().last() else {
            return Ok(StateUpdate::needs_user_input("No messages to evaluate."));
        };
        let last_response = if last.content.trim().is_empty() {
            NO_CONTENT
        } else {
            last.content.as_str()
        };

        let request = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(build_prompt(state, last_response)),
        ];
        let output = with_timeout(
            "llm:evaluator",
            self.llm_timeout,
            self.llm.complete(&request, &[]),
        )
        .await?
        .map_err(SidekickError::Llm)?;

        let mut verdict = parse_verdict(&output.content)?;

        let repeated = if verdict.success_criteria_met {
            0
        } else {
            let same_as_prior = state
                .feedback_on_work
                .as_deref()
                .map(|prior| normalize_feedback(prior) == normalize_feedback(&verdict.feedback))
                .unwrap_or(false);
            if same_as_prior {
                state.repeated_feedback + 1
            } else {
                1
            }
        };
        if !verdict.success_criteria_met && repeated >= self.repeated_feedback_limit && !verdict.user_input_needed {
            tracing::warn!(
                thread_id = %state.thread_id,
                repeated,
                "evaluator repeated the same feedback, asking user for input"
            );
            verdict.user_input_needed = true;
        }

        tracing::info!(
            thread_id = %state.thread_id,
            success_criteria_met = verdict.success_criteria_met,
            user_input_needed = verdict.user_input_needed,
            "evaluator verdict"
        );
        Ok(StateUpdate::from_verdict(&verdict, repeated))
    }
}
