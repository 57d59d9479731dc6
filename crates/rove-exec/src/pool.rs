// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

use rove_types::{AgentResult, AgentStatus, AgentTask, SubTaskOutcome};

use crate::backend::{CycleExecutor, ExecutionBackend, RunState};
use crate::context::ExecutionContext;
use crate::inline::drive_loop;

/// Worker-pool backend over tokio tasks.
///
/// One task still runs its own cycle loop sequentially; different tasks (and
/// batch sub-task jobs) run concurrently, bounded by `max_concurrency`.
/// Tasks are isolated: a panic in one does not cancel the others.
pub struct TaskBackend {
    limiter: Arc<Semaphore>,
    max_concurrency: usize,
}

impl TaskBackend {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Submit a future to the pool and get its handle back.
    pub fn submit<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(future)
    }

    /// Run `f` over `items` concurrently, preserving input order in the
    /// returned vector.
    pub async fn parallel_map<T, U, F, Fut>(&self, f: F, items: Vec<T>) -> Vec<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let limiter = Arc::clone(&self.limiter);
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_owned().await.expect("semaphore open");
                f(item).await
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            // Join in submission order so indices stay aligned.
            results.push(handle.await.expect("pool job panicked"));
        }
        results
    }
}

impl Default for TaskBackend {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl ExecutionBackend for TaskBackend {
    async fn execute(
        &self,
        task: &AgentTask,
        state: RunState,
        executor: Arc<dyn CycleExecutor>,
        ctx: Option<ExecutionContext>,
        max_cycles: u32,
    ) -> AgentResult {
        let task_id = task.task_id.clone();
        let handle = self.submit(drive_loop(state, executor, ctx, max_cycles));
        match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(task_id = %task_id, error = %join_err, "worker task for run aborted");
                AgentResult {
                    status: AgentStatus::Failed,
                    messages: Vec::new(),
                    cycles: Vec::new(),
                    final_answer: None,
                    wait_reason: None,
                    error: Some(format!("run worker aborted: {join_err}")),
                    shared_state: Default::default(),
                    token_usage: Default::default(),
                }
            }
        }
    }

    async fn dispatch_batch(
        &self,
        jobs: Vec<BoxFuture<'static, (usize, SubTaskOutcome)>>,
    ) -> Vec<(usize, SubTaskOutcome)> {
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let limiter = Arc::clone(&self.limiter);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_owned().await.expect("semaphore open");
                job.await
            }));
        }
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => warn!(error = %join_err, "batch sub-task job aborted"),
            }
        }
        outcomes
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
