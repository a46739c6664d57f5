//! 编排图：任务状态、Worker / Evaluator 节点与驱动它们的状态机

pub mod engine;
pub mod evaluator;
pub mod state;
pub mod worker;

pub use engine::{next_node, GraphLimits, OrchestrationGraph, RunSummary};
pub use evaluator::{format_conversation, parse_verdict, Evaluator};
pub use state::{EvaluationVerdict, Node, StateUpdate, TaskState};
pub use worker::{directive, Worker};
