// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Execution machinery: cancellation, execution context, the backend
//! abstraction that drives the cycle loop (inline, task-pool, and
//! cycle-sharded variants), and the checkpoint state stores that make
//! sharded runs resumable.

mod backend;
mod cancellation;
mod context;
mod inline;
mod pool;
mod sharded;
mod sqlite;
mod state;

pub use backend::{cancelled_result, max_cycles_result, CycleExecutor, ExecutionBackend, RunState};
pub use cancellation::{Cancelled, CancellationToken};
pub use context::ExecutionContext;
pub use inline::InlineBackend;
pub use pool::TaskBackend;
pub use sharded::{CycleBroker, CycleDispatch, RuntimeRecipe, ShardedBackend};
pub use sqlite::SqliteStateStore;
pub use state::{InMemoryStateStore, StateStore, StateStoreError};
