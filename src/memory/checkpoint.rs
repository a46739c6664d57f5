//! 检查点持久化
//!
//! 每个 thread_id 一条记录，内容为完整 TaskState 的 JSON（CheckpointRecord 信封）。
//! 三种后端：内存、每线程一个 JSON 文件、SQLite。解码时校验 system 消息不变量，
//! 损坏的检查点以 SidekickError::Checkpoint 传播给调用方。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::SidekickError;
use crate::graph::TaskState;
use crate::memory::Role;

/// 当前检查点格式版本
pub const CHECKPOINT_VERSION: u32 = 1;

/// 持久化信封：版本 + 写入时间 + 状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub state: TaskState,
}

/// 序列化 TaskState 为检查点 JSON
pub fn encode_checkpoint(state: &TaskState) -> Result<String, SidekickError> {
    let record = CheckpointRecord {
        version: CHECKPOINT_VERSION,
        saved_at: Utc::now(),
        state: state.clone(),
    };
    serde_json::to_string(&record).map_err(|e| SidekickError::Checkpoint(e.to_string()))
}

/// 解码检查点 JSON；版本不符或 system 消息不变量被破坏时报错
pub fn decode_checkpoint(data: &str) -> Result<TaskState, SidekickError> {
    let record: CheckpointRecord =
        serde_json::from_str(data).map_err(|e| SidekickError::Checkpoint(e.to_string()))?;
    if record.version != CHECKPOINT_VERSION {
        return Err(SidekickError::Checkpoint(format!(
            "unsupported checkpoint version {}",
            record.version
        )));
    }
    let state = record.state;
    let system_positions: Vec<usize> = state
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::System)
        .map(|(i, _)| i)
        .collect();
    match system_positions.as_slice() {
        [] | [0] => Ok(state),
        _ => Err(SidekickError::Checkpoint(format!(
            "thread {}: system message must be unique and first, found at {:?}",
            state.thread_id, system_positions
        ))),
    }
}

/// 解码并确认记录属于请求的线程
fn decode_for(thread_id: &str, data: &str) -> Result<TaskState, SidekickError> {
    let state = decode_checkpoint(data)?;
    if state.thread_id != thread_id {
        return Err(SidekickError::Checkpoint(format!(
            "checkpoint for thread {} holds thread {}",
            thread_id, state.thread_id
        )));
    }
    Ok(state)
}

/// 检查点存储接口（按 thread_id 读写）
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<TaskState>, SidekickError>;

    async fn save(&self, state: &TaskState) -> Result<(), SidekickError>;

    async fn delete(&self, thread_id: &str) -> Result<(), SidekickError>;

    /// 清空全部检查点（hard reset）
    async fn clear(&self) -> Result<(), SidekickError>;
}

/// 内存检查点：仍按编码后的 JSON 保存，行为与持久化后端一致
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    records: RwLock<HashMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<TaskState>, SidekickError> {
        let records = self.records.read().await;
        records.get(thread_id).map(|d| decode_for(thread_id, d)).transpose()
    }

    async fn save(&self, state: &TaskState) -> Result<(), SidekickError> {
        let data = encode_checkpoint(state)?;
        self.records
            .write()
            .await
            .insert(state.thread_id.clone(), data);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), SidekickError> {
        self.records.write().await.remove(thread_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), SidekickError> {
        self.records.write().await.clear();
        Ok(())
    }
}

/// 文件检查点：dir/<thread_id>.json，父目录不存在时自动创建
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// ASCII 字母数字与 '-' 原样保留，其余字节写成 `_xx`（小写十六进制），不同 id 不会映射到同一文件
    fn path_for(&self, thread_id: &str) -> PathBuf {
        let mut name = String::with_capacity(thread_id.len());
        for byte in thread_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("_{:02x}", byte));
            }
        }
        self.dir.join(format!("{}.json", name))
    }
}

fn io_err(e: std::io::Error) -> SidekickError {
    SidekickError::Checkpoint(e.to_string())
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<TaskState>, SidekickError> {
        let path = self.path_for(thread_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => decode_for(thread_id, &data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn save(&self, state: &TaskState) -> Result<(), SidekickError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let data = encode_checkpoint(state)?;
        let path = self.path_for(&state.thread_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), SidekickError> {
        match tokio::fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn clear(&self) -> Result<(), SidekickError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                tokio::fs::remove_file(&path).await.map_err(io_err)?;
            }
        }
        Ok(())
    }
}

/// SQLite 检查点：单表 checkpoints(thread_id PRIMARY KEY, state, updated_at)
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

fn sql_err(e: rusqlite::Error) -> SidekickError {
    SidekickError::Checkpoint(e.to_string())
}

impl SqliteCheckpointStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SidekickError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let conn = Connection::open(db_path.as_ref()).map_err(sql_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, SidekickError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, SidekickError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池中执行同步 SQLite 操作
    async fn blocking<T, F>(&self, f: F) -> Result<T, SidekickError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SidekickError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| SidekickError::Checkpoint(format!("connection poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| SidekickError::Checkpoint(format!("Task join: {}", e)))?
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<TaskState>, SidekickError> {
        let id = thread_id.to_string();
        let data: Option<String> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT state FROM checkpoints WHERE thread_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)
            })
            .await?;
        data.map(|d| decode_for(thread_id, &d)).transpose()
    }

    async fn save(&self, state: &TaskState) -> Result<(), SidekickError> {
        let data = encode_checkpoint(state)?;
        let thread_id = state.thread_id.clone();
        let now = Utc::now().to_rfc3339();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO checkpoints (thread_id, state, updated_at) VALUES (?1, ?2, ?3)",
                params![thread_id, data, now],
            )
            .map(|_| ())
            .map_err(sql_err)
        })
        .await
    }

    async fn delete(&self, thread_id: &str) -> Result<(), SidekickError> {
        let thread_id = thread_id.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])
                .map(|_| ())
                .map_err(sql_err)
        })
        .await
    }

    async fn clear(&self) -> Result<(), SidekickError> {
        self.blocking(|conn| {
            conn.execute("DELETE FROM checkpoints", [])
                .map(|_| ())
                .map_err(sql_err)
        })
        .await
    }
}
