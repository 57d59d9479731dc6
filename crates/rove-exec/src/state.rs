// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

use rove_types::Checkpoint;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state store backend error: {0}")]
    Backend(String),
}

/// Checkpoint persistence between distributed cycles.
///
/// The driver saves before dispatching and workers load-then-save, so
/// implementations must be safe for concurrent access from several
/// processes or tasks.  Every `Checkpoint` field round-trips losslessly.
pub trait StateStore: Send + Sync {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StateStoreError>;
    fn load_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, StateStoreError>;
    fn delete_checkpoint(&self, task_id: &str) -> Result<(), StateStoreError>;
    fn list_checkpoints(&self) -> Result<Vec<String>, StateStoreError>;
}

/// In-memory store.  Checkpoints are held as canonical JSON strings so the
/// serialize/deserialize discipline matches the persistent stores exactly.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StateStoreError> {
        let encoded = serde_json::to_string(checkpoint)?;
        self.entries
            .lock()
            .expect("state store lock")
            .insert(checkpoint.task_id.clone(), encoded);
        Ok(())
    }

    fn load_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, StateStoreError> {
        let entries = self.entries.lock().expect("state store lock");
        match entries.get(task_id) {
            Some(encoded) => Ok(Some(serde_json::from_str(encoded)?)),
            None => Ok(None),
        }
    }

    fn delete_checkpoint(&self, task_id: &str) -> Result<(), StateStoreError> {
        self.entries.lock().expect("state store lock").remove(task_id);
        Ok(())
    }

    fn list_checkpoints(&self) -> Result<Vec<String>, StateStoreError> {
        Ok(self.entries.lock().expect("state store lock").keys().cloned().collect())
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
