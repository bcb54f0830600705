// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistence for conversation rows.
//
// The SQLite store keeps one JSON row per owner in WAL mode so it survives
// process restarts. `rusqlite` is synchronous, so calls hop onto the
// blocking pool; per-owner serialization upstream keeps writers from
// racing.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{Connection, params};
use tracing::{debug, info};

use druckwerk_core::OwnerId;
use druckwerk_core::error::{DruckwerkError, Result};

use crate::state::ChatRow;

/// Loads and saves per-owner conversation rows.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The owner's row; a fresh default row when none is stored.
    async fn load(&self, owner: &OwnerId) -> Result<ChatRow>;

    /// Persist the owner's row, replacing any previous one.
    async fn save(&self, owner: &OwnerId, row: &ChatRow) -> Result<()>;
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStateStore {
    rows: DashMap<OwnerId, ChatRow>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, owner: &OwnerId) -> Result<ChatRow> {
        Ok(self
            .rows
            .get(owner)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn save(&self, owner: &OwnerId, row: &ChatRow) -> Result<()> {
        self.rows.insert(owner.clone(), row.clone());
        Ok(())
    }
}

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS chat_rows (
        owner TEXT PRIMARY KEY,
        row TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

/// Durable store backed by a SQLite database.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| DruckwerkError::StateStore(format!("open: {e}")))?;

        // WAL survives unclean shutdowns more gracefully and lets the API
        // read while the bot writes.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| DruckwerkError::StateStore(format!("WAL pragma: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| DruckwerkError::StateStore(format!("create table: {e}")))?;

        info!(path = %path.as_ref().display(), "chat state database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DruckwerkError::StateStore(format!("open in-memory: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| DruckwerkError::StateStore(format!("create table: {e}")))?;
        debug!("in-memory chat state database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, owner: &OwnerId) -> Result<ChatRow> {
        let conn = self.conn.clone();
        let owner = owner.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| DruckwerkError::StateStore("connection lock poisoned".into()))?;
            let mut stmt = conn
                .prepare("SELECT row FROM chat_rows WHERE owner = ?1")
                .map_err(|e| DruckwerkError::StateStore(format!("prepare load: {e}")))?;
            let mut rows = stmt
                .query(params![owner.as_str()])
                .map_err(|e| DruckwerkError::StateStore(format!("query load: {e}")))?;
            match rows
                .next()
                .map_err(|e| DruckwerkError::StateStore(format!("row: {e}")))?
            {
                Some(row) => {
                    let json: String = row
                        .get(0)
                        .map_err(|e| DruckwerkError::StateStore(format!("column: {e}")))?;
                    Ok(serde_json::from_str(&json)?)
                }
                None => Ok(ChatRow::default()),
            }
        })
        .await
        .map_err(|e| DruckwerkError::StateStore(format!("load task: {e}")))?
    }

    async fn save(&self, owner: &OwnerId, row: &ChatRow) -> Result<()> {
        let conn = self.conn.clone();
        let owner = owner.clone();
        let json = serde_json::to_string(row)?;
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| DruckwerkError::StateStore("connection lock poisoned".into()))?;
            conn.execute(
                "INSERT INTO chat_rows (owner, row, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(owner) DO UPDATE SET row = ?2, updated_at = ?3",
                params![owner.as_str(), json, Utc::now().to_rfc3339()],
            )
            .map_err(|e| DruckwerkError::StateStore(format!("save: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| DruckwerkError::StateStore(format!("save task: {e}")))?
    }
}
