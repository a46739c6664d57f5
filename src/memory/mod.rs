//! 记忆层：对话消息与按线程的检查点持久化

pub mod checkpoint;
pub mod conversation;

pub use checkpoint::{
    decode_checkpoint, encode_checkpoint, CheckpointRecord, CheckpointStore,
    InMemoryCheckpointStore, JsonFileCheckpointStore, SqliteCheckpointStore,
};
pub use conversation::{Message, Role, ToolCall, NO_CONTENT};
