//! Resource Manager：按 thread_id 持有浏览器会话
//!
//! 每个线程至多一个存活句柄，首次使用时惰性创建；同一线程的创建/清理/重启经由线程锁串行，
//! 不同线程互不阻塞。创建与关闭都受超时约束；关闭失败只记日志，条目无论如何都会被移除。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex;

use crate::core::{with_timeout, SidekickError};
use crate::tools::browser::{browser_toolkit, BrowserSession};
use crate::tools::ToolRegistry;

/// 资源生命周期原语：创建与关闭
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn create(&self, thread_id: &str) -> Result<Arc<dyn BrowserSession>, String>;

    async fn close(&self, handle: Arc<dyn BrowserSession>) -> Result<(), String> {
        handle.close().await
    }
}

/// 单个线程的资源条目：句柄 + 绑定到该句柄的工具集
pub struct ResourceEntry {
    pub thread_id: String,
    pub handle: Arc<dyn BrowserSession>,
    pub tools: ToolRegistry,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("thread_id", &self.thread_id)
            .field("tools", &self.tools.tool_names())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceTimeouts {
    pub create: Duration,
    pub teardown: Duration,
    /// 单次浏览器操作
    pub operation: Duration,
}

impl Default for ResourceTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30),
            teardown: Duration::from_secs(10),
            operation: Duration::from_secs(30),
        }
    }
}

pub struct ResourceManager {
    factory: Arc<dyn ResourceFactory>,
    timeouts: ResourceTimeouts,
    entries: Mutex<HashMap<String, Arc<ResourceEntry>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResourceManager {
    pub fn new(factory: Arc<dyn ResourceFactory>, timeouts: ResourceTimeouts) -> Self {
        Self {
            factory,
            timeouts,
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(thread_id.to_string()).or_default())
    }

    /// 丢弃无人等待的线程锁
    async fn prune_locks(&self) {
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// 返回已有条目，或创建新条目（同一线程并发调用只会创建一次）
    pub async fn get_or_create(&self, thread_id: &str) -> Result<Arc<ResourceEntry>, SidekickError> {
        if let Some(entry) = self.entries.lock().await.get(thread_id) {
            return Ok(Arc::clone(entry));
        }
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;
        if let Some(entry) = self.entries.lock().await.get(thread_id) {
            return Ok(Arc::clone(entry));
        }
        self.create_locked(thread_id).await
    }

    /// 创建并登记条目；调用方须持有线程锁
    async fn create_locked(&self, thread_id: &str) -> Result<Arc<ResourceEntry>, SidekickError> {
        let handle = with_timeout(
            "resource:create",
            self.timeouts.create,
            self.factory.create(thread_id),
        )
        .await
        .map_err(|e| SidekickError::ResourceInit(e.to_string()))?
        .map_err(SidekickError::ResourceInit)?;

        let entry = Arc::new(ResourceEntry {
            thread_id: thread_id.to_string(),
            tools: browser_toolkit(Arc::clone(&handle), self.timeouts.operation),
            handle,
            created_at: Utc::now(),
        });
        self.entries
            .lock()
            .await
            .insert(thread_id.to_string(), Arc::clone(&entry));
        tracing::info!(thread_id = %thread_id, "browser resource created");
        Ok(entry)
    }

    async fn teardown(&self, entry: Arc<ResourceEntry>) {
        let closed = with_timeout(
            "resource:teardown",
            self.timeouts.teardown,
            self.factory.close(Arc::clone(&entry.handle)),
        )
        .await;
        match closed {
            Ok(Ok(())) => tracing::info!(thread_id = %entry.thread_id, "browser resource closed"),
            Ok(Err(e)) => {
                tracing::warn!(thread_id = %entry.thread_id, error = %e, "error closing browser resource")
            }
            Err(e) => {
                tracing::warn!(thread_id = %entry.thread_id, error = %e, "browser resource teardown timed out")
            }
        }
    }

    /// 移除并关闭条目；调用方须持有线程锁。返回是否存在过条目
    async fn cleanup_locked(&self, thread_id: &str) -> bool {
        let removed = self.entries.lock().await.remove(thread_id);
        match removed {
            Some(entry) => {
                self.teardown(entry).await;
                true
            }
            None => false,
        }
    }

    /// 清理线程资源；关闭失败不向上传播
    pub async fn cleanup(&self, thread_id: &str) -> bool {
        let lock = self.thread_lock(thread_id).await;
        let removed = {
            let _guard = lock.lock().await;
            self.cleanup_locked(thread_id).await
        };
        drop(lock);
        self.prune_locks().await;
        removed
    }

    /// 关闭旧句柄并立即创建新句柄
    pub async fn restart(&self, thread_id: &str) -> Result<Arc<ResourceEntry>, SidekickError> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;
        tracing::warn!(thread_id = %thread_id, "restarting browser resource");
        self.cleanup_locked(thread_id).await;
        self.create_locked(thread_id).await
    }

    /// 清理全部线程资源（hard reset / 进程退出）
    pub async fn cleanup_all(&self) {
        let ids = self.thread_ids().await;
        let count = ids.len();
        join_all(ids.iter().map(|id| self.cleanup(id))).await;
        tracing::info!(count, "all browser resources cleaned up");
    }

    pub async fn contains(&self, thread_id: &str) -> bool {
        self.entries.lock().await.contains_key(thread_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn thread_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct NullSession;

    #[async_trait]
    impl BrowserSession for NullSession {
        async fn navigate(&self, url: &str) -> Result<String, String> {
            Ok(format!("Navigating to {} returned status code 200", url))
        }
        async fn current_url(&self) -> Result<String, String> {
            Ok("about:blank".to_string())
        }
        async fn go_back(&self) -> Result<String, String> {
            Err("no history".to_string())
        }
        async fn page_text(&self) -> Result<String, String> {
            Ok(String::new())
        }
        async fn hyperlinks(&self) -> Result<Vec<String>, String> {
            Ok(Vec::new())
        }
        async fn close(&self) -> Result<(), String> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        closed: AtomicUsize,
        fail_create: bool,
        fail_close: bool,
        create_delay: Option<Duration>,
    }

    #[async_trait]
    impl ResourceFactory for CountingFactory {
        async fn create(&self, _thread_id: &str) -> Result<Arc<dyn BrowserSession>, String> {
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_create {
                return Err("chrome not installed".to_string());
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullSession))
        }

        async fn close(&self, _handle: Arc<dyn BrowserSession>) -> Result<(), String> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err("already gone".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn manager(factory: Arc<CountingFactory>) -> ResourceManager {
        ResourceManager::new(factory, ResourceTimeouts::default())
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_single_handle() {
        let factory = Arc::new(CountingFactory {
            create_delay: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let mgr = manager(factory.clone());
        let (a, b) = tokio::join!(mgr.get_or_create("t1"), mgr.get_or_create("t1"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.len().await, 1);
    }

    #[tokio::test]
    async fn test_entry_carries_browser_tools() {
        let mgr = manager(Arc::new(CountingFactory::default()));
        let entry = mgr.get_or_create("t1").await.unwrap();
        assert!(entry.tools.contains("navigate_browser"));
        assert_eq!(entry.thread_id, "t1");
    }

    #[tokio::test]
    async fn test_cleanup_removes_even_when_close_fails() {
        let factory = Arc::new(CountingFactory {
            fail_close: true,
            ..Default::default()
        });
        let mgr = manager(factory.clone());
        mgr.get_or_create("t1").await.unwrap();
        assert!(mgr.cleanup("t1").await);
        assert!(!mgr.contains("t1").await);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert!(!mgr.cleanup("t1").await);
    }

    #[tokio::test]
    async fn test_restart_replaces_handle() {
        let factory = Arc::new(CountingFactory::default());
        let mgr = manager(factory.clone());
        let first = mgr.get_or_create("t1").await.unwrap();
        let second = mgr.restart("t1").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_failure_is_resource_init() {
        let mgr = manager(Arc::new(CountingFactory {
            fail_create: true,
            ..Default::default()
        }));
        let err = mgr.get_or_create("t1").await.unwrap_err();
        assert!(matches!(err, SidekickError::ResourceInit(_)));
        assert!(mgr.is_empty().await);
    }

    #[tokio::test]
    async fn test_create_timeout_is_resource_init() {
        let factory = Arc::new(CountingFactory {
            create_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let mgr = ResourceManager::new(
            factory,
            ResourceTimeouts {
                create: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let err = mgr.get_or_create("t1").await.unwrap_err();
        assert!(matches!(err, SidekickError::ResourceInit(msg) if msg.contains("resource:create")));
    }

    #[tokio::test]
    async fn test_cleanup_all_leaves_empty_map() {
        let factory = Arc::new(CountingFactory::default());
        let mgr = manager(factory.clone());
        for id in ["a", "b", "c"] {
            mgr.get_or_create(id).await.unwrap();
        }
        assert_eq!(mgr.thread_ids().await, vec!["a", "b", "c"]);
        mgr.cleanup_all().await;
        assert!(mgr.is_empty().await);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 3);
    }
}
