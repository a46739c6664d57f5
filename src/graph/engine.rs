//! 编排图：Worker → Tools → Worker … → Evaluator → (Worker | Terminal)
//!
//! 每个节点的错误都经 FaultContainment 转为状态更新，因此图本身不会失败；
//! 整次调用受 graph 超时约束，并可被 CancellationToken 中断（未完成的节点 future 被 drop）。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{with_timeout, FaultContainment};
use crate::graph::{Evaluator, Node, StateUpdate, TaskState, Worker};
use crate::tools::ToolDispatcher;

const CANCELLED_DIAGNOSTIC: &str = "The task was cancelled before it finished.";

/// 图的运行上限
#[derive(Debug, Clone, Copy)]
pub struct GraphLimits {
    pub max_steps: usize,
    pub graph_timeout: Duration,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_steps: 25,
            graph_timeout: Duration::from_secs(120),
        }
    }
}

/// 单次调用的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: usize,
    pub worker_turns: usize,
    pub tool_rounds: usize,
    pub evaluator_turns: usize,
    pub timed_out: bool,
    pub cancelled: bool,
    pub step_limit_hit: bool,
}

/// 纯转移函数：由当前节点与合并后的状态决定下一个节点
pub fn next_node(current: Node, state: &TaskState) -> Node {
    if state.is_terminal() {
        return Node::Terminal;
    }
    match current {
        Node::Worker => {
            if state.last_message().map(|m| m.has_tool_calls()).unwrap_or(false) {
                Node::Tools
            } else {
                Node::Evaluator
            }
        }
        Node::Tools | Node::Evaluator => Node::Worker,
        Node::Terminal => Node::Terminal,
    }
}

pub struct OrchestrationGraph {
    worker: Worker,
    evaluator: Evaluator,
    dispatcher: Arc<ToolDispatcher>,
    containment: FaultContainment,
    limits: GraphLimits,
}

impl OrchestrationGraph {
    pub fn new(
        worker: Worker,
        evaluator: Evaluator,
        dispatcher: Arc<ToolDispatcher>,
        containment: FaultContainment,
        limits: GraphLimits,
    ) -> Self {
        Self {
            worker,
            evaluator,
            dispatcher,
            containment,
            limits,
        }
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    pub fn limits(&self) -> GraphLimits {
        self.limits
    }

    /// 从 Worker 开始推进状态直到 Terminal；结束时 state.is_terminal() 恒为 true
    pub async fn invoke(&self, state: &mut TaskState, cancel: &CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let outcome = tokio::select! {
            res = with_timeout("graph", self.limits.graph_timeout, self.run(state, &mut summary)) => Some(res),
            _ = cancel.cancelled() => None,
        };

        match outcome {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                summary.timed_out = err.is_timeout();
                state.close_pending_tool_calls(&err.to_string());
                let update = self.containment.contain(err, state, "graph").await;
                state.apply(update);
            }
            None => {
                summary.cancelled = true;
                tracing::warn!(thread_id = %state.thread_id, "graph invocation cancelled");
                state.close_pending_tool_calls("tool call cancelled");
                state.apply(StateUpdate::needs_user_input(CANCELLED_DIAGNOSTIC));
            }
        }

        tracing::info!(
            thread_id = %state.thread_id,
            steps = summary.steps,
            worker_turns = summary.worker_turns,
            tool_rounds = summary.tool_rounds,
            evaluator_turns = summary.evaluator_turns,
            success_criteria_met = state.success_criteria_met,
            user_input_needed = state.user_input_needed,
            "graph finished"
        );
        summary
    }

    async fn run(&self, state: &mut TaskState, summary: &mut RunSummary) {
        let tools = self.dispatcher.specs();
        let mut node = Node::Worker;

        while node != Node::Terminal {
            if summary.steps >= self.limits.max_steps {
                summary.step_limit_hit = true;
                tracing::warn!(thread_id = %state.thread_id, max_steps = self.limits.max_steps, "step limit reached");
                state.close_pending_tool_calls("tool call skipped, step limit reached");
                state.apply(StateUpdate::needs_user_input(format!(
                    "Stopped after {} steps without meeting the success criteria. Please refine the request or the criteria.",
                    self.limits.max_steps
                )));
                break;
            }
            summary.steps += 1;
            tracing::debug!(thread_id = %state.thread_id, node = %node, step = summary.steps, "enter node");

            let result = match node {
                Node::Worker => {
                    summary.worker_turns += 1;
                    self.worker.run(state, &tools).await
                }
                Node::Tools => {
                    summary.tool_rounds += 1;
                    Ok(self.run_tools(state).await)
                }
                Node::Evaluator => {
                    summary.evaluator_turns += 1;
                    self.evaluator.run(state).await
                }
                Node::Terminal => break,
            };
            let update = match result {
                Ok(update) => update,
                Err(err) => self.containment.contain(err, state, node.as_str()).await,
            };
            state.apply(update);
            node = next_node(node, state);
        }
    }

    async fn run_tools(&self, state: &TaskState) -> StateUpdate {
        let calls = state
            .last_message()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();
        let messages = self.dispatcher.execute_all(&state.thread_id, &calls).await;
        StateUpdate {
            messages,
            ..Default::default()
        }
    }
}
