//! Session Coordinator：对外入口
//!
//! 每个线程一把异步锁，同线程的请求排队执行；检查点在锁内读改写。
//! 取消令牌由 hard_reset 触发并替换，被取消的调用不写回检查点。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::SidekickError;
use crate::graph::{OrchestrationGraph, TaskState};
use crate::memory::{CheckpointStore, Message, Role};
use crate::tools::ResourceManager;

const MISSING_CRITERIA: &str = "Please provide success criteria for the task.";

/// 新线程 id（uuid v4）
pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub struct SessionCoordinator {
    graph: Arc<OrchestrationGraph>,
    store: Arc<dyn CheckpointStore>,
    resources: Arc<ResourceManager>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cancel_token: RwLock<CancellationToken>,
}

impl SessionCoordinator {
    pub fn new(
        graph: Arc<OrchestrationGraph>,
        store: Arc<dyn CheckpointStore>,
        resources: Arc<ResourceManager>,
    ) -> Self {
        Self {
            graph,
            store,
            resources,
            locks: Mutex::new(HashMap::new()),
            cancel_token: RwLock::new(CancellationToken::new()),
        }
    }

    pub fn graph(&self) -> &Arc<OrchestrationGraph> {
        &self.graph
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(thread_id.to_string()).or_default())
    }

    /// 丢弃无人持有或等待的线程锁
    async fn prune_locks(&self) {
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// 处理一条用户消息，返回本轮新增的可展示消息
    pub async fn process(
        &self,
        thread_id: &str,
        message: &str,
        success_criteria: &str,
    ) -> Result<Vec<Message>, SidekickError> {
        if message.trim().is_empty() {
            return Ok(Vec::new());
        }
        if success_criteria.trim().is_empty() {
            tracing::warn!(thread_id = %thread_id, "request without success criteria");
            return Ok(vec![Message::assistant(MISSING_CRITERIA)]);
        }

        let lock = self.thread_lock(thread_id).await;
        let result = self.process_locked(&lock, thread_id, message, success_criteria).await;
        drop(lock);
        self.prune_locks().await;
        result
    }

    async fn process_locked(
        &self,
        lock: &Mutex<()>,
        thread_id: &str,
        message: &str,
        success_criteria: &str,
    ) -> Result<Vec<Message>, SidekickError> {
        let _guard = lock.lock().await;
        let cancel = self.cancel_token.read().await.child_token();

        let mut state = match self.store.load(thread_id).await? {
            Some(state) => state,
            None => TaskState::new(thread_id, success_criteria),
        };
        state.begin_turn(message, success_criteria);
        tracing::info!(thread_id = %thread_id, history = state.messages.len(), "processing message");

        let summary = self.graph.invoke(&mut state, &cancel).await;
        {
            // 与 cancel_in_flight 互斥：取消之后不再写回
            let _epoch = self.cancel_token.read().await;
            if summary.cancelled || cancel.is_cancelled() {
                tracing::warn!(thread_id = %thread_id, "invocation cancelled, checkpoint not saved");
            } else {
                self.store.save(&state).await?;
            }
        }

        let start = state
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .map(|i| i + 1)
            .unwrap_or(state.messages.len());
        Ok(state.messages[start..]
            .iter()
            .filter(|m| m.is_displayable())
            .cloned()
            .collect())
    }

    /// 返回 history + 用户消息 + 本轮新增的可展示消息
    pub async fn process_message(
        &self,
        thread_id: &str,
        message: &str,
        success_criteria: &str,
        history: Vec<Message>,
    ) -> Result<Vec<Message>, SidekickError> {
        if message.trim().is_empty() {
            return Ok(history);
        }
        let replies = self.process(thread_id, message, success_criteria).await?;
        let mut out = history;
        out.push(Message::user(message));
        out.extend(replies);
        Ok(out)
    }

    /// 清理该线程的资源与检查点，返回新的线程 id；其它线程不受影响
    pub async fn reset_thread(&self, thread_id: &str) -> Result<String, SidekickError> {
        let lock = self.thread_lock(thread_id).await;
        let cleared = {
            let _guard = lock.lock().await;
            self.resources.cleanup(thread_id).await;
            self.store.delete(thread_id).await
        };
        drop(lock);
        self.prune_locks().await;
        cleared?;
        let new_id = new_thread_id();
        tracing::info!(old = %thread_id, new = %new_id, "thread reset");
        Ok(new_id)
    }

    /// 取消所有进行中的调用，清理全部资源与检查点
    pub async fn hard_reset(&self) -> Result<String, SidekickError> {
        self.cancel_in_flight().await;
        self.resources.cleanup_all().await;
        self.store.clear().await?;
        tracing::info!("hard reset complete");
        Ok(new_thread_id())
    }

    /// 退出前调用：取消进行中的调用并释放全部资源，保留检查点
    pub async fn shutdown(&self) {
        self.cancel_in_flight().await;
        self.resources.cleanup_all().await;
        tracing::info!("coordinator shut down");
    }

    async fn cancel_in_flight(&self) {
        let mut token = self.cancel_token.write().await;
        token.cancel();
        *token = CancellationToken::new();
    }
}
