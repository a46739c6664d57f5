//! Timeout Guard：为任意异步操作施加时限
//!
//! 超时时被包装的 future 会被 drop，其持有的资源随之释放（取消向下传播）；
//! 守卫内部不做重试，重试策略由调用方决定。

use std::future::Future;
use std::time::Duration;

use crate::core::SidekickError;

/// 在 limit 内执行 fut；超时返回 TimeoutExceeded { operation, duration }
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T, SidekickError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            tracing::error!(operation = %operation, limit_secs = limit.as_secs_f64(), "operation timed out");
            Err(SidekickError::timeout(operation, limit))
        }
    }
}

/// 与 with_timeout 相同，但被包装的 future 本身可失败，结果展平为一层 Result
pub async fn try_with_timeout<T, F>(
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<T, SidekickError>
where
    F: Future<Output = Result<T, SidekickError>>,
{
    with_timeout(operation, limit, fut).await?
}

/// 具名、可复用的时限（如 "graph" 120s、"tool:search" 60s）
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    operation: String,
    limit: Duration,
}

impl TimeoutGuard {
    pub fn new(operation: impl Into<String>, limit: Duration) -> Self {
        Self {
            operation: operation.into(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub async fn run<T, F>(&self, fut: F) -> Result<T, SidekickError>
    where
        F: Future<Output = T>,
    {
        with_timeout(&self.operation, self.limit, fut).await
    }

    pub async fn try_run<T, F>(&self, fut: F) -> Result<T, SidekickError>
    where
        F: Future<Output = Result<T, SidekickError>>,
    {
        try_with_timeout(&self.operation, self.limit, fut).await
    }
}
