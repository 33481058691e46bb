//! 记忆层：消息日志、历史压缩、检查点持久化

pub mod checkpoint;
pub mod compaction;
pub mod conversation;

pub use checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use compaction::{plan_retention, CompactionPolicy, CompactionReport, HistoryCompactor};
pub use conversation::{
    render_transcript, HandlerTurn, MessageLog, ToolRequest, ToolResultTurn, Turn,
};
