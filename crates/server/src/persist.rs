//! Persistence layer — pluggable persister contract, the embedded SQLite
//! implementation, and the fire-and-forget write queue.
//!
//! SQLite access goes through `spawn_blocking`; the database is opened once
//! per workspace and shared by every session in it. Durability failures are
//! logged and never surface into a live conversation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use tether_protocol::{Message, SessionData, ToolUse, UserContent};

use crate::events::{EventChannel, SessionEvent};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Pluggable durable-storage strategy for session metadata and messages.
#[async_trait]
pub trait AgentPersister: Send + Sync {
    async fn save_session(&self, data: SessionData) -> Result<(), PersistError>;
    async fn get_session(&self, id: &str) -> Result<Option<SessionData>, PersistError>;
    /// All sessions, most recently active first.
    async fn get_all_sessions(&self) -> Result<Vec<SessionData>, PersistError>;
    /// Deletes the session row; messages cascade.
    async fn delete_session(&self, id: &str) -> Result<(), PersistError>;
    async fn save_message(&self, session_id: &str, message: Message) -> Result<(), PersistError>;
    async fn save_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), PersistError>;
    /// Messages in chronological order.
    async fn get_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Message>, PersistError>;
    async fn delete_messages(&self, session_id: &str) -> Result<(), PersistError>;
    async fn message_count(&self, session_id: &str) -> Result<usize, PersistError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id            TEXT PRIMARY KEY,
    summary       TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    cwd           TEXT NOT NULL,
    metadata      TEXT
);
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    type        TEXT NOT NULL,
    content     TEXT NOT NULL,
    timestamp   TEXT NOT NULL,
    is_tool_use INTEGER NOT NULL DEFAULT 0,
    tool_name   TEXT,
    tool_input  TEXT,
    tool_id     TEXT,
    tool_result TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_type ON messages(type);
";

/// Default persister: one SQLite database per workspace.
pub struct SqlitePersister {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersister {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<(), PersistError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, PersistError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl AgentPersister for SqlitePersister {
    async fn save_session(&self, data: SessionData) -> Result<(), PersistError> {
        self.with_conn(move |conn| {
            let metadata = serde_json::to_string(&data.metadata)?;
            conn.execute(
                "INSERT INTO sessions (id, summary, created_at, last_activity, cwd, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                   summary = excluded.summary,
                   last_activity = excluded.last_activity,
                   metadata = excluded.metadata",
                params![
                    data.id,
                    data.summary,
                    data.created_at.to_rfc3339(),
                    data.last_activity.to_rfc3339(),
                    data.cwd,
                    metadata,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionData>, PersistError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, summary, created_at, last_activity, cwd, metadata
                 FROM sessions WHERE id = ?1",
                params![id],
                session_from_row,
            )
            .optional()
            .map_err(PersistError::from)
        })
        .await
    }

    async fn get_all_sessions(&self) -> Result<Vec<SessionData>, PersistError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, summary, created_at, last_activity, cwd, metadata
                 FROM sessions ORDER BY last_activity DESC",
            )?;
            let rows = stmt
                .query_map([], session_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_session(&self, id: &str) -> Result<(), PersistError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn save_message(&self, session_id: &str, message: Message) -> Result<(), PersistError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| insert_message(conn, &session_id, &message))
            .await
    }

    async fn save_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), PersistError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for message in &messages {
                insert_message(&tx, &session_id, message)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Message>, PersistError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, type, content, timestamp, tool_name, tool_input, tool_id, tool_result
                 FROM messages WHERE session_id = ?1
                 ORDER BY timestamp, rowid
                 LIMIT ?2 OFFSET ?3",
            )?;
            let limit = limit.map(|l| l as i64).unwrap_or(-1);
            let rows = stmt
                .query_map(params![session_id, limit, offset as i64], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_messages(&self, session_id: &str) -> Result<(), PersistError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM messages WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn message_count(&self, session_id: &str) -> Result<usize, PersistError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionData> {
    let created_at: String = row.get(2)?;
    let last_activity: String = row.get(3)?;
    let metadata: Option<String> = row.get(5)?;
    Ok(SessionData {
        id: row.get(0)?,
        summary: row.get(1)?,
        created_at: parse_timestamp(&created_at),
        last_activity: parse_timestamp(&last_activity),
        cwd: row.get(4)?,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(Value::Null),
    })
}

/// Insert or replace one message row. Replacement carries tool-result
/// attachment through to the durable copy.
fn insert_message(
    conn: &Connection,
    session_id: &str,
    message: &Message,
) -> Result<(), PersistError> {
    let content = serialize_content(message)?;
    let (tool_name, tool_input, tool_id, tool_result) = tool_columns(message);
    conn.execute(
        "INSERT OR REPLACE INTO messages
           (id, session_id, type, content, timestamp, is_tool_use, tool_name, tool_input, tool_id, tool_result)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            message.id(),
            session_id,
            message.type_name(),
            content,
            message.timestamp().to_rfc3339(),
            message.is_tool_use() as i64,
            tool_name,
            tool_input,
            tool_id,
            tool_result,
        ],
    )?;
    Ok(())
}

/// Content is stored as an opaque serialized blob and parsed back on read,
/// falling back to a raw string payload when parsing fails.
fn serialize_content(message: &Message) -> Result<String, PersistError> {
    let value = match message {
        Message::User { content, .. } => serde_json::to_value(content)?,
        Message::Agent {
            text,
            thinking,
            streaming,
            ..
        } => serde_json::json!({
            "text": text,
            "thinking": thinking,
            "streaming": streaming,
        }),
        Message::Tool {
            tool_output,
            duration_ms,
            ..
        } => serde_json::json!({
            "output": tool_output,
            "duration_ms": duration_ms,
        }),
        Message::System { text, payload, .. } | Message::Error { text, payload, .. } => {
            serde_json::json!({ "text": text, "payload": payload })
        }
    };
    Ok(serde_json::to_string(&value)?)
}

fn tool_columns(
    message: &Message,
) -> (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
) {
    match message {
        Message::Agent {
            tool_use: Some(tool_use),
            ..
        } => (
            Some(tool_use.tool_name.clone()),
            Some(tool_use.tool_input.clone()),
            Some(tool_use.tool_id.clone()),
            tool_use.tool_result.clone(),
        ),
        Message::Tool {
            tool_name,
            tool_id,
            tool_input,
            ..
        } => (
            Some(tool_name.clone()),
            Some(tool_input.clone()),
            Some(tool_id.clone()),
            None,
        ),
        _ => (None, None, None, None),
    }
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let type_name: String = row.get(1)?;
    let content: String = row.get(2)?;
    let timestamp_raw: String = row.get(3)?;
    let tool_name: Option<String> = row.get(4)?;
    let tool_input: Option<String> = row.get(5)?;
    let tool_id: Option<String> = row.get(6)?;
    let tool_result: Option<String> = row.get(7)?;

    let timestamp = parse_timestamp(&timestamp_raw);
    let parsed: Option<Value> = serde_json::from_str(&content).ok();

    let message = match type_name.as_str() {
        "user" => Message::User {
            id,
            timestamp,
            content: parsed
                .and_then(|v| serde_json::from_value::<UserContent>(v).ok())
                .unwrap_or(UserContent::Text(content)),
        },
        "agent" => {
            let (text, thinking, streaming) = match &parsed {
                Some(v) if v.is_object() => (
                    v.get("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    v.get("thinking")
                        .and_then(|t| t.as_str())
                        .map(str::to_string),
                    v.get("streaming").and_then(|s| s.as_bool()).unwrap_or(false),
                ),
                _ => (content, None, false),
            };
            let tool_use = tool_id.map(|tool_id| ToolUse {
                tool_name: tool_name.unwrap_or_default(),
                tool_id,
                tool_input: tool_input.unwrap_or_default(),
                tool_result,
            });
            Message::Agent {
                id,
                timestamp,
                text,
                thinking,
                streaming,
                tool_use,
            }
        }
        "tool" => {
            let (output, duration_ms) = match &parsed {
                Some(v) if v.is_object() => (
                    v.get("output")
                        .and_then(|o| o.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    v.get("duration_ms").and_then(|d| d.as_u64()),
                ),
                _ => (content, None),
            };
            Message::Tool {
                id,
                timestamp,
                tool_name: tool_name.unwrap_or_default(),
                tool_id: tool_id.unwrap_or_default(),
                tool_input: tool_input.unwrap_or_default(),
                tool_output: output,
                duration_ms,
            }
        }
        other => {
            let (text, payload) = match &parsed {
                Some(v) if v.is_object() => (
                    v.get("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    v.get("payload").cloned().unwrap_or(Value::Null),
                ),
                _ => (content, Value::Null),
            };
            if other == "system" {
                Message::System {
                    id,
                    timestamp,
                    text,
                    payload,
                }
            } else {
                Message::Error {
                    id,
                    timestamp,
                    text,
                    payload,
                }
            }
        }
    };
    Ok(message)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ---------------------------------------------------------------------------
// Fire-and-forget write queue
// ---------------------------------------------------------------------------

/// Commands for the background persistence writer.
pub enum PersistCommand {
    SaveSession {
        data: SessionData,
        events: Option<EventChannel>,
    },
    SaveMessage {
        session_id: String,
        message: Message,
        events: Option<EventChannel>,
    },
    DeleteSession {
        id: String,
    },
    /// Round-trip marker so tests can await durability.
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the detached persistence writer. Enqueues never block the
/// conversation hot path; a full or closed queue drops the write with a
/// warning.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<PersistCommand>,
}

impl PersistHandle {
    pub fn spawn(persister: Arc<dyn AgentPersister>) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(writer_loop(persister, rx));
        Self { tx }
    }

    pub fn save_session(&self, data: SessionData, events: Option<EventChannel>) {
        self.enqueue(PersistCommand::SaveSession { data, events });
    }

    pub fn save_message(
        &self,
        session_id: String,
        message: Message,
        events: Option<EventChannel>,
    ) {
        self.enqueue(PersistCommand::SaveMessage {
            session_id,
            message,
            events,
        });
    }

    pub fn delete_session(&self, id: String) {
        self.enqueue(PersistCommand::DeleteSession { id });
    }

    /// Wait until every previously enqueued write has been executed.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PersistCommand::Flush { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    fn enqueue(&self, command: PersistCommand) {
        if self.tx.try_send(command).is_err() {
            warn!(
                component = "persistence",
                event = "persist.queue.dropped",
                "Persistence queue full or closed, write dropped"
            );
        }
    }
}

async fn writer_loop(persister: Arc<dyn AgentPersister>, mut rx: mpsc::Receiver<PersistCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            PersistCommand::SaveSession { data, events } => {
                report(events, persister.save_session(data).await);
            }
            PersistCommand::SaveMessage {
                session_id,
                message,
                events,
            } => {
                report(events, persister.save_message(&session_id, message).await);
            }
            PersistCommand::DeleteSession { id } => {
                if let Err(e) = persister.delete_session(&id).await {
                    error!(
                        component = "persistence",
                        event = "persist.delete.failed",
                        session_id = %id,
                        error = %e,
                        "Failed to delete session"
                    );
                }
            }
            PersistCommand::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

fn report(events: Option<EventChannel>, result: Result<(), PersistError>) {
    match result {
        Ok(()) => {
            if let Some(events) = events {
                events.publish(SessionEvent::PersistSucceeded);
            }
        }
        Err(e) => {
            error!(
                component = "persistence",
                event = "persist.write.failed",
                error = %e,
                "Persistence write failed"
            );
            if let Some(events) = events {
                events.publish(SessionEvent::PersistFailed {
                    message: e.to_string(),
                });
            }
        }
    }
}
