//! 检查点存储：按 thread_id 读写 ConversationState
//!
//! 编排层唯一的持久化边界。内存实现用于测试与单进程演示；SQLite 实现把整份状态序列化为 JSON 存一行，
//! 所有 SQLite 访问都放到 tokio 阻塞线程池上执行，不占用异步工作线程。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::ConversationState;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Checkpoint task failed: {0}")]
    Task(String),
}

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 读取会话状态；不存在时返回 None
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, CheckpointError>;

    /// 覆盖写入会话状态（以 state.thread_id() 为键）
    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError>;
}

/// 内存存储
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, CheckpointError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError> {
        self.threads
            .write()
            .await
            .insert(state.thread_id().to_string(), state.clone());
        Ok(())
    }
}

/// SQLite 存储：threads(thread_id, state, updated_at)
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CheckpointError::Io(format!("{}: {}", parent.display(), e)))?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CheckpointError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                thread_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池上持锁执行 f；传入的数据必须是 owned（'static）
    async fn call<F, R>(&self, f: F) -> Result<R, CheckpointError>
    where
        F: FnOnce(&Connection) -> Result<R, CheckpointError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CheckpointError::Io("checkpoint connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| CheckpointError::Task(e.to_string()))?
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, CheckpointError> {
        let thread_id = thread_id.to_string();
        let raw: Option<String> = self
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT state FROM threads WHERE thread_id = ?1",
                        params![thread_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError> {
        let json = serde_json::to_string(state)?;
        let thread_id = state.thread_id().to_string();
        let updated_at = state.updated_at();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO threads (thread_id, state, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(thread_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                params![thread_id, json, updated_at],
            )?;
            Ok(())
        })
        .await
    }
}
