//! Worker 节点：组装 system 指令并调用推理模型
//!
//! 指令包含成功标准与上一轮被驳回的反馈；模型看到完整历史与全部工具描述，
//! 输出一条 assistant 消息（可能带工具调用）。

use std::sync::Arc;
use std::time::Duration;

use crate::core::{with_timeout, SidekickError};
use crate::graph::{StateUpdate, TaskState};
use crate::llm::LlmClient;
use crate::memory::{Message, Role, NO_CONTENT};
use crate::tools::ToolSpec;

/// 组装 Worker 的 system 指令
pub fn directive(success_criteria: &str, feedback_on_work: Option<&str>) -> String {
    let mut text = format!(
        "You are a helpful assistant that can use tools to complete tasks.
You keep working on a task until either you have a question or clarification for the user, or the success criteria is met.
This is the success criteria:
{}
You should reply either with a question for the user about this assignment, or with your final response.
If you have a question for the user, you need to reply by clearly stating your question. An example might be:

Question: please clarify whether you want a summary or a detailed answer

If you've finished, reply with the final answer, and don't ask a question; simply reply with the answer.
",
        success_criteria
    );
    if let Some(feedback) = feedback_on_work.filter(|f| !f.trim().is_empty()) {
        text.push_str(&format!(
            "
Previously you thought you completed the assignment, but your reply was rejected because the success criteria was not met.
Here is the feedback on why this was rejected:
{}
With this feedback, please continue the assignment, ensuring that you meet the success criteria or have a question for the user.",
            feedback
        ));
    }
    text
}

pub struct Worker {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
}

impl Worker {
    pub fn new(llm: Arc<dyn LlmClient>, llm_timeout: Duration) -> Self {
        Self { llm, llm_timeout }
    }

    pub async fn run(&self, state: &TaskState, tools: &[ToolSpec]) -> Result<StateUpdate, SidekickError> {
        if state.success_criteria.trim().is_empty() {
            return Ok(StateUpdate::needs_user_input(
                "Please provide success criteria for the task.",
            ));
        }

        let system = Message::system(directive(
            &state.success_criteria,
            state.feedback_on_work.as_deref(),
        ));
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        messages.push(system.clone());
        messages.extend(state.conversation().cloned());

        let mut reply = with_timeout(
            "llm:worker",
            self.llm_timeout,
            self.llm.complete(&messages, tools),
        )
        .await?
        .map_err(SidekickError::Llm)?;

        reply.role = Role::Assistant;
        if reply.tool_calls.is_empty() && reply.content.trim().is_empty() {
            tracing::warn!(thread_id = %state.thread_id, "worker produced empty reply");
            reply.content = NO_CONTENT.to_string();
        }
        tracing::info!(
            thread_id = %state.thread_id,
            tool_calls = reply.tool_calls.len(),
            preview = %reply.content.chars().take(100).collect::<String>(),
            "worker response"
        );

        Ok(StateUpdate {
            system: Some(system),
            messages: vec![reply],
            ..Default::default()
        })
    }
}
