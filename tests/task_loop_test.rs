//! Worker / Tools / Evaluator 循环集成测试

mod common;

use std::time::Duration;

use serde_json::json;
use sidekick::llm::{ScriptedLlmClient, ScriptedReply};
use sidekick::memory::{CheckpointStore, Message, Role};
use sidekick::tools::ToolRegistry;

use common::{call, verdict, DelayedTool, Harness, Limits};

fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

#[tokio::test]
async fn test_single_pass_termination() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![ScriptedReply::text("4")]),
        ScriptedLlmClient::new(vec![verdict("Correct numeric answer", true, false)]),
        ToolRegistry::new(),
    );
    let replies = h
        .coordinator
        .process("t1", "What is 2+2?", "a numeric answer")
        .await
        .unwrap();

    assert_eq!(
        contents(&replies),
        vec!["4", "Evaluator Feedback on this answer: Correct numeric answer"]
    );
    assert_eq!(h.worker.call_count(), 1);
    assert_eq!(h.evaluator.call_count(), 1);

    let state = h.store.load("t1").await.unwrap().unwrap();
    assert!(state.success_criteria_met);
    assert!(!state.user_input_needed);
    assert_eq!(state.system_message_count(), 1);
    assert_eq!(state.messages[0].role, Role::System);
}

#[tokio::test]
async fn test_empty_criteria_skips_models() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![]),
        ScriptedLlmClient::new(vec![]),
        ToolRegistry::new(),
    );
    let replies = h.coordinator.process("t1", "Do something", "   ").await.unwrap();
    assert_eq!(
        contents(&replies),
        vec!["Please provide success criteria for the task."]
    );
    assert_eq!(h.worker.call_count(), 0);
    assert_eq!(h.evaluator.call_count(), 0);
    assert!(h.store.load("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_message_is_noop() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![]),
        ScriptedLlmClient::new(vec![]),
        ToolRegistry::new(),
    );
    let history = vec![Message::user("earlier"), Message::assistant("reply")];
    let out = h
        .coordinator
        .process_message("t1", "  ", "criteria", history.clone())
        .await
        .unwrap();
    assert_eq!(out, history);
    assert_eq!(h.worker.call_count(), 0);
}

#[tokio::test]
async fn test_search_then_answer() {
    let mut tools = ToolRegistry::new();
    tools.register(DelayedTool::new("search", 0, "X is a programming language."));
    let h = Harness::new(
        ScriptedLlmClient::new(vec![
            ScriptedReply::tool_calls(vec![call("call_1", "search", json!({"query": "X"}))]),
            ScriptedReply::text("X is a programming language."),
        ]),
        ScriptedLlmClient::new(vec![verdict("Summary is accurate", true, false)]),
        tools,
    );
    let out = h
        .coordinator
        .process_message("t1", "Find information about X", "a one-sentence summary", vec![])
        .await
        .unwrap();

    assert_eq!(
        contents(&out),
        vec![
            "Find information about X",
            "X is a programming language.",
            "Evaluator Feedback on this answer: Summary is accurate",
        ]
    );

    // 第二次 Worker 调用能看到工具结果
    let second = &h.worker.requests()[1];
    assert!(second
        .iter()
        .any(|m| m.role == Role::Tool && m.content == "X is a programming language."));

    let state = h.store.load("t1").await.unwrap().unwrap();
    let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Assistant,
        ]
    );
}

#[tokio::test]
async fn test_tool_results_keep_request_order() {
    let mut tools = ToolRegistry::new();
    tools.register(DelayedTool::new("a", 30, "result a"));
    tools.register(DelayedTool::new("b", 150, "result b"));
    tools.register(DelayedTool::new("c", 5, "result c"));
    let h = Harness::new(
        ScriptedLlmClient::new(vec![
            ScriptedReply::tool_calls(vec![
                call("1", "a", json!({})),
                call("2", "b", json!({})),
                call("3", "c", json!({})),
            ]),
            ScriptedReply::text("done"),
        ]),
        ScriptedLlmClient::new(vec![verdict("ok", true, false)]),
        tools,
    );
    h.coordinator.process("t1", "run a, b and c", "all results").await.unwrap();

    let state = h.store.load("t1").await.unwrap().unwrap();
    let tool_msgs: Vec<(&str, &str)> = state
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.as_deref().unwrap_or(""), m.content.as_str()))
        .collect();
    assert_eq!(
        tool_msgs,
        vec![("1", "result a"), ("2", "result b"), ("3", "result c")]
    );
}

#[tokio::test]
async fn test_tool_timeout_becomes_error_message() {
    let mut tools = ToolRegistry::new();
    tools.register(DelayedTool::new("slow", 2_000, "too late"));
    let limits = Limits {
        tool_timeout: Duration::from_millis(100),
        ..Limits::default()
    };
    let h = Harness::with(
        ScriptedLlmClient::new(vec![
            ScriptedReply::tool_calls(vec![call("call_1", "slow", json!({}))]),
            ScriptedReply::text("The tool timed out, here is what I know."),
        ]),
        ScriptedLlmClient::new(vec![verdict("Acceptable", true, false)]),
        tools,
        limits,
        std::sync::Arc::new(sidekick::memory::InMemoryCheckpointStore::new()),
    );
    let replies = h.coordinator.process("t1", "use the slow tool", "any answer").await.unwrap();
    assert_eq!(replies[0].content, "The tool timed out, here is what I know.");

    let state = h.store.load("t1").await.unwrap().unwrap();
    let tool_msg = state
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_msg.is_error);
    assert!(tool_msg.content.contains("tool:slow exceeded"));
    assert!(state.success_criteria_met);
}

#[tokio::test]
async fn test_unknown_tool_reported_to_worker() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![
            ScriptedReply::tool_calls(vec![call("call_1", "teleport", json!({}))]),
            ScriptedReply::text("I cannot teleport."),
        ]),
        ScriptedLlmClient::new(vec![verdict("Fine", true, false)]),
        ToolRegistry::new(),
    );
    h.coordinator.process("t1", "teleport me", "an honest answer").await.unwrap();
    let second = &h.worker.requests()[1];
    let tool_msg = second.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.is_error);
    assert!(tool_msg.content.contains("Unknown tool: teleport"));
}

#[tokio::test]
async fn test_rejection_loops_back_to_worker_with_feedback() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![ScriptedReply::text("5"), ScriptedReply::text("4")]),
        ScriptedLlmClient::new(vec![
            verdict("2+2 is not 5", false, false),
            verdict("Correct", true, false),
        ]),
        ToolRegistry::new(),
    );
    let replies = h.coordinator.process("t1", "What is 2+2?", "a correct number").await.unwrap();
    assert_eq!(
        contents(&replies),
        vec![
            "5",
            "Evaluator Feedback on this answer: 2+2 is not 5",
            "4",
            "Evaluator Feedback on this answer: Correct",
        ]
    );
    let second = &h.worker.requests()[1];
    assert!(second[0].content.contains("Here is the feedback on why this was rejected:\n2+2 is not 5"));
}

#[tokio::test]
async fn test_repeated_feedback_forces_user_input() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![]).with_fallback(Message::assistant("5")),
        ScriptedLlmClient::new(vec![
            verdict("Wrong answer", false, false),
            verdict("Wrong answer", false, false),
            verdict("Wrong answer", false, false),
            verdict("Wrong answer", false, false),
        ]),
        ToolRegistry::new(),
    );
    h.coordinator.process("t1", "What is 2+2?", "a correct number").await.unwrap();
    assert_eq!(h.evaluator.call_count(), 3);
    assert_eq!(h.worker.call_count(), 3);
    let state = h.store.load("t1").await.unwrap().unwrap();
    assert!(state.user_input_needed);
    assert!(!state.success_criteria_met);
    assert_eq!(state.repeated_feedback, 3);
}

#[tokio::test]
async fn test_graph_timeout_yields_diagnostic() {
    let limits = Limits {
        graph_timeout: Duration::from_millis(200),
        ..Limits::default()
    };
    let h = Harness::with(
        ScriptedLlmClient::new(vec![ScriptedReply::text("late").delayed(Duration::from_secs(3))]),
        ScriptedLlmClient::new(vec![]),
        ToolRegistry::new(),
        limits,
        std::sync::Arc::new(sidekick::memory::InMemoryCheckpointStore::new()),
    );
    let replies = h.coordinator.process("t1", "slow question", "anything").await.unwrap();
    assert_eq!(
        contents(&replies),
        vec!["Operation in 'graph' timed out. Please try again with a simpler request."]
    );
    let state = h.store.load("t1").await.unwrap().unwrap();
    assert!(state.user_input_needed);
    assert_eq!(h.evaluator.call_count(), 0);
}

#[tokio::test]
async fn test_worker_error_is_contained() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![ScriptedReply::error("503 Service Unavailable")]),
        ScriptedLlmClient::new(vec![]),
        ToolRegistry::new(),
    );
    let replies = h.coordinator.process("t1", "hi", "a greeting").await.unwrap();
    assert_eq!(
        contents(&replies),
        vec!["An error occurred in 'worker': LLM error: 503 Service Unavailable"]
    );
    assert_eq!(h.evaluator.call_count(), 0);
}

#[tokio::test]
async fn test_unparseable_verdict_is_contained() {
    let h = Harness::new(
        ScriptedLlmClient::new(vec![ScriptedReply::text("4")]),
        ScriptedLlmClient::new(vec![ScriptedReply::text("I think it is fine")]),
        ToolRegistry::new(),
    );
    let replies = h.coordinator.process("t1", "What is 2+2?", "a number").await.unwrap();
    let last = replies.last().unwrap();
    assert!(last
        .content
        .starts_with("An error occurred in 'evaluator': Evaluation schema error"));
    assert!(h.store.load("t1").await.unwrap().unwrap().user_input_needed);
}

#[tokio::test]
async fn test_step_limit_stops_tool_loop() {
    let mut tools = ToolRegistry::new();
    tools.register(DelayedTool::new("search", 0, "nothing new"));
    let limits = Limits {
        max_steps: 4,
        ..Limits::default()
    };
    let looping = Message::assistant_with_tools("", vec![call("c", "search", json!({"query": "again"}))]);
    let h = Harness::with(
        ScriptedLlmClient::new(vec![]).with_fallback(looping),
        ScriptedLlmClient::new(vec![]),
        tools,
        limits,
        std::sync::Arc::new(sidekick::memory::InMemoryCheckpointStore::new()),
    );
    let replies = h.coordinator.process("t1", "keep searching", "something").await.unwrap();
    assert!(replies
        .last()
        .unwrap()
        .content
        .starts_with("Stopped after 4 steps"));
    assert_eq!(h.worker.call_count(), 2);
    assert_eq!(h.evaluator.call_count(), 0);
}

fn unanswered_call_ids(state: &sidekick::TaskState) -> Vec<String> {
    let mut pending = Vec::new();
    for (i, msg) in state.messages.iter().enumerate() {
        for call in &msg.tool_calls {
            let answered = state.messages[i + 1..]
                .iter()
                .any(|m| m.tool_call_id.as_deref() == Some(call.id.as_str()));
            if !answered {
                pending.push(call.id.clone());
            }
        }
    }
    pending
}

#[tokio::test]
async fn test_step_limit_answers_pending_tool_calls() {
    let mut tools = ToolRegistry::new();
    tools.register(DelayedTool::new("search", 0, "nothing new"));
    let looping = Message::assistant_with_tools("", vec![call("c", "search", json!({"query": "again"}))]);
    let h = Harness::with(
        ScriptedLlmClient::new(vec![]).with_fallback(looping),
        ScriptedLlmClient::new(vec![verdict("ok", true, false)]),
        tools,
        Limits::default(),
        std::sync::Arc::new(sidekick::memory::InMemoryCheckpointStore::new()),
    );
    h.coordinator.process("t1", "keep searching", "something").await.unwrap();

    let state = h.store.load("t1").await.unwrap().unwrap();
    assert!(unanswered_call_ids(&state).is_empty());
    let closing = state.messages.iter().rev().find(|m| m.role == Role::Tool).unwrap();
    assert!(closing.is_error);
    assert!(closing.content.contains("step limit"));
    assert!(state.last_message().unwrap().content.starts_with("Stopped after 25 steps"));
}

#[tokio::test]
async fn test_graph_timeout_during_tools_answers_pending_calls() {
    let mut tools = ToolRegistry::new();
    tools.register(DelayedTool::new("slow", 2_000, "too late"));
    let limits = Limits {
        graph_timeout: Duration::from_millis(200),
        ..Limits::default()
    };
    let h = Harness::with(
        ScriptedLlmClient::new(vec![
            ScriptedReply::tool_calls(vec![call("c1", "slow", json!({}))]),
            ScriptedReply::text("answer on the next turn"),
        ]),
        ScriptedLlmClient::new(vec![verdict("ok", true, false)]),
        tools,
        limits,
        std::sync::Arc::new(sidekick::memory::InMemoryCheckpointStore::new()),
    );
    let replies = h.coordinator.process("t1", "use the slow tool", "anything").await.unwrap();
    assert_eq!(
        contents(&replies),
        vec!["Operation in 'graph' timed out. Please try again with a simpler request."]
    );
    let state = h.store.load("t1").await.unwrap().unwrap();
    assert!(unanswered_call_ids(&state).is_empty());

    // 下一轮 Worker 收到的历史中每个工具调用都有结果
    h.coordinator.process("t1", "try again", "anything").await.unwrap();
    let second = &h.worker.requests()[1];
    let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::User,
        ]
    );
}
