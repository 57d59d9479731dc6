// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use rove_types::{AgentStatus, Checkpoint, CycleRecord, Message, StateMap};

use crate::state::{StateStore, StateStoreError};

/// Persistent checkpoint store backed by SQLite.
///
/// Layout when workspace-rooted: `<workspace>/.agent-state/checkpoints.db`,
/// single `checkpoints` table keyed by `task_id` with JSON columns for
/// messages, cycles, and shared state.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let conn = Connection::open(db_path).map_err(backend_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(backend_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.create_table()?;
        Ok(store)
    }

    /// In-memory database; useful in tests that still want SQL semantics.
    pub fn open_in_memory() -> Result<Self, StateStoreError> {
        let conn = Connection::open_in_memory().map_err(backend_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.create_table()?;
        Ok(store)
    }

    fn create_table(&self) -> Result<(), StateStoreError> {
        self.conn
            .lock()
            .expect("sqlite lock")
            .execute(
                "CREATE TABLE IF NOT EXISTS checkpoints (
                    task_id TEXT PRIMARY KEY,
                    cycle_index INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    messages TEXT NOT NULL,
                    cycles TEXT NOT NULL,
                    shared_state TEXT NOT NULL
                )",
                [],
            )
            .map_err(backend_err)?;
        Ok(())
    }
}

fn backend_err(err: rusqlite::Error) -> StateStoreError {
    StateStoreError::Backend(err.to_string())
}

fn status_str(status: AgentStatus) -> Result<String, StateStoreError> {
    // serde gives the canonical snake_case value; strip the JSON quotes.
    Ok(serde_json::to_string(&status)?.trim_matches('"').to_string())
}

impl StateStore for SqliteStateStore {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StateStoreError> {
        let messages = serde_json::to_string(&checkpoint.messages)?;
        let cycles = serde_json::to_string(&checkpoint.cycles)?;
        let shared = serde_json::to_string(&checkpoint.shared_state)?;
        let status = status_str(checkpoint.status)?;
        self.conn
            .lock()
            .expect("sqlite lock")
            .execute(
                "INSERT OR REPLACE INTO checkpoints
                    (task_id, cycle_index, status, messages, cycles, shared_state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![checkpoint.task_id, checkpoint.cycle_index, status, messages, cycles, shared],
            )
            .map_err(backend_err)?;
        Ok(())
    }

    fn load_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, StateStoreError> {
        let conn = self.conn.lock().expect("sqlite lock");
        let row: Option<(String, u32, String, String, String, String)> = conn
            .query_row(
                "SELECT task_id, cycle_index, status, messages, cycles, shared_state
                 FROM checkpoints WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()
            .map_err(backend_err)?;

        let Some((task_id, cycle_index, status, messages, cycles, shared)) = row else {
            return Ok(None);
        };
        let status: AgentStatus = serde_json::from_str(&format!("\"{status}\""))?;
        let messages: Vec<Message> = serde_json::from_str(&messages)?;
        let cycles: Vec<CycleRecord> = serde_json::from_str(&cycles)?;
        let shared_state: StateMap = serde_json::from_str(&shared)?;
        Ok(Some(Checkpoint {
            task_id,
            cycle_index,
            status,
            messages,
            cycles,
            shared_state,
        }))
    }

    fn delete_checkpoint(&self, task_id: &str) -> Result<(), StateStoreError> {
        self.conn
            .lock()
            .expect("sqlite lock")
            .execute("DELETE FROM checkpoints WHERE task_id = ?1", params![task_id])
            .map_err(backend_err)?;
        Ok(())
    }

    fn list_checkpoints(&self) -> Result<Vec<String>, StateStoreError> {
        let conn = self.conn.lock().expect("sqlite lock");
        let mut statement = conn
            .prepare("SELECT task_id FROM checkpoints ORDER BY task_id")
            .map_err(backend_err)?;
        let ids = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_err)?;
        Ok(ids)
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
