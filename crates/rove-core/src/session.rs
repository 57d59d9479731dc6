// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use uuid::Uuid;

use rove_exec::{CancellationToken, ExecutionContext};
use rove_types::{AgentResult, AgentStatus, AgentTask, Message, StateMap};

use crate::engine::{AgentRuntime, BeforeCycleProvider, InterruptionProvider, LogHandler, RunOptions};

/// Session event sink: `(event_name, payload)`.  Receives both the engine's
/// run events and the session's own lifecycle events.
pub type SessionEventHandler = Arc<dyn Fn(&str, &StateMap) + Send + Sync>;

/// Stateful, single-active-run façade over the engine.
///
/// Holds the conversation and shared state across turns against a stable
/// workspace, and adds steering (mid-run user messages) and follow-up
/// (queued next prompts) on top of one agent definition.
pub struct AgentSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    runtime: Arc<AgentRuntime>,
    base_task: AgentTask,
    workspace: PathBuf,
    session_id: String,
    state: Mutex<SessionState>,
    steering: Mutex<VecDeque<String>>,
    follow_up: Mutex<VecDeque<String>>,
    listeners: Mutex<Vec<(u64, SessionEventHandler)>>,
    next_listener_id: AtomicU64,
    run_counter: AtomicU64,
    active_token: Mutex<Option<CancellationToken>>,
}

#[derive(Default)]
struct SessionState {
    running: bool,
    messages: Vec<Message>,
    shared_state: StateMap,
    latest: Option<AgentResult>,
}

impl AgentSession {
    pub fn new(runtime: Arc<AgentRuntime>, base_task: AgentTask, workspace: impl Into<PathBuf>) -> Self {
        Self::with_session_id(runtime, base_task, workspace, Uuid::new_v4().simple().to_string()[..12].to_string())
    }

    pub fn with_session_id(
        runtime: Arc<AgentRuntime>,
        base_task: AgentTask,
        workspace: impl Into<PathBuf>,
        session_id: impl Into<String>,
    ) -> Self {
        let mut session_id = session_id.into().trim().to_string();
        if session_id.is_empty() {
            session_id = Uuid::new_v4().simple().to_string()[..12].to_string();
        }
        Self {
            inner: Arc::new(SessionInner {
                runtime,
                base_task,
                workspace: workspace.into(),
                session_id,
                state: Mutex::new(SessionState::default()),
                steering: Mutex::new(VecDeque::new()),
                follow_up: Mutex::new(VecDeque::new()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                run_counter: AtomicU64::new(0),
                active_token: Mutex::new(None),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn running(&self) -> bool {
        self.inner.state.lock().expect("session state lock").running
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().expect("session state lock").messages.clone()
    }

    pub fn shared_state(&self) -> StateMap {
        self.inner.state.lock().expect("session state lock").shared_state.clone()
    }

    pub fn latest_result(&self) -> Option<AgentResult> {
        self.inner.state.lock().expect("session state lock").latest.clone()
    }

    /// Register a listener; returns an id for [`AgentSession::unsubscribe`].
    pub fn subscribe(&self, listener: SessionEventHandler) -> u64 {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .expect("listeners lock")
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner
            .listeners
            .lock()
            .expect("listeners lock")
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Queue a mid-run user message.  The next cycle boundary (or the tool
    /// runner, mid-cycle) picks it up.
    pub fn steer(&self, prompt: impl Into<String>) -> anyhow::Result<()> {
        let text = prompt.into().trim().to_string();
        if text.is_empty() {
            anyhow::bail!("steer prompt cannot be empty");
        }
        self.inner.steering.lock().expect("steering lock").push_back(text.clone());
        self.inner.emit("session_steer_queued", json_map(json!({"prompt": text})));
        Ok(())
    }

    /// Queue a prompt to run automatically after the current run completes.
    pub fn follow_up(&self, prompt: impl Into<String>) -> anyhow::Result<()> {
        let text = prompt.into().trim().to_string();
        if text.is_empty() {
            anyhow::bail!("follow_up prompt cannot be empty");
        }
        self.inner.follow_up.lock().expect("follow-up lock").push_back(text.clone());
        self.inner.emit("session_follow_up_queued", json_map(json!({"prompt": text})));
        Ok(())
    }

    pub fn clear_queues(&self) {
        self.inner.steering.lock().expect("steering lock").clear();
        self.inner.follow_up.lock().expect("follow-up lock").clear();
        self.inner.emit("session_queues_cleared", StateMap::new());
    }

    /// Cancel the in-flight run, if any.  Clears both queues.
    pub fn cancel(&self) -> bool {
        let cancelled = {
            let token = self.inner.active_token.lock().expect("token lock");
            match token.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            }
        };
        if cancelled {
            self.inner.steering.lock().expect("steering lock").clear();
            self.inner.follow_up.lock().expect("follow-up lock").clear();
            self.inner.emit("session_cancel_requested", StateMap::new());
        }
        cancelled
    }

    /// Run one prompt.  With `auto_follow_up`, queued follow-ups run in
    /// order as long as each run completes.
    pub async fn prompt(&self, prompt: impl Into<String>, auto_follow_up: bool) -> anyhow::Result<AgentResult> {
        let text = prompt.into().trim().to_string();
        if text.is_empty() {
            anyhow::bail!("prompt cannot be empty");
        }

        let mut result = self.run_once(text).await?;
        if !auto_follow_up {
            return Ok(result);
        }
        loop {
            if result.status != AgentStatus::Completed {
                return Ok(result);
            }
            let Some(next) = self.inner.follow_up.lock().expect("follow-up lock").pop_front() else {
                return Ok(result);
            };
            self.inner
                .emit("session_follow_up_dequeued", json_map(json!({"prompt": next})));
            result = self.run_once(next).await?;
        }
    }

    /// Resume a waiting run with the given text, or the next queued prompt.
    pub async fn continue_run(&self, prompt: Option<String>) -> anyhow::Result<AgentResult> {
        if let Some(text) = prompt {
            let text = text.trim().to_string();
            if !text.is_empty() {
                return self.run_once(text).await;
            }
        }
        let queued = {
            let mut steering = self.inner.steering.lock().expect("steering lock");
            match steering.pop_front() {
                Some(text) => Some(text),
                None => self.inner.follow_up.lock().expect("follow-up lock").pop_front(),
            }
        };
        let Some(text) = queued else {
            anyhow::bail!("No queued prompt available. Provide a prompt or call steer()/follow_up() first.");
        };
        self.run_once(text).await
    }

    /// Run once and return the final answer; errors unless the run completed
    /// (relaxed with `require_completed = false`).
    pub async fn query(&self, prompt: impl Into<String>, require_completed: bool) -> anyhow::Result<String> {
        let result = self.prompt(prompt, true).await?;
        if result.status == AgentStatus::Completed {
            return Ok(result.final_answer.unwrap_or_default());
        }
        if require_completed {
            let reason = result
                .error
                .or(result.wait_reason)
                .or(result.final_answer)
                .unwrap_or_else(|| "session query did not complete".to_string());
            anyhow::bail!("Session query failed with status {:?}: {reason}", result.status);
        }
        Ok(result
            .final_answer
            .or(result.wait_reason)
            .or(result.error)
            .unwrap_or_default())
    }

    async fn run_once(&self, prompt: String) -> anyhow::Result<AgentResult> {
        let token = CancellationToken::new();
        let (initial_messages, shared_snapshot) = {
            let mut state = self.inner.state.lock().expect("session state lock");
            if state.running {
                anyhow::bail!("Session is already running. Queue with steer()/follow_up() or wait for completion.");
            }
            state.running = true;
            (state.messages.clone(), state.shared_state.clone())
        };
        *self.inner.active_token.lock().expect("token lock") = Some(token.clone());

        self.inner.emit(
            "session_run_start",
            json_map(json!({"prompt": prompt, "existing_messages": initial_messages.len()})),
        );

        let run_index = self.inner.run_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut task = self.inner.base_task.clone();
        task.task_id = format!("{}_run_{run_index}", self.inner.session_id);

        let inner = Arc::clone(&self.inner);
        let before_cycle: BeforeCycleProvider = {
            let inner = Arc::clone(&self.inner);
            Arc::new(move |cycle_index: u32, _messages: &[Message], _shared: &StateMap| {
                inner.drain_steering_for_cycle(cycle_index)
            })
        };
        let interruption: InterruptionProvider = {
            let inner = Arc::clone(&self.inner);
            Arc::new(move || inner.drain_steering_interrupt())
        };
        let log_handler: LogHandler = {
            let inner = Arc::clone(&self.inner);
            Arc::new(move |event: &str, payload: &StateMap| inner.emit(event, payload.clone()))
        };

        let result = inner
            .runtime
            .run_with(
                task,
                RunOptions {
                    workspace: Some(inner.workspace.clone()),
                    shared_state: Some(shared_snapshot),
                    initial_messages: Some(initial_messages),
                    user_message: Some(prompt),
                    before_cycle_messages: Some(before_cycle),
                    interruption_messages: Some(interruption),
                    log_handler: Some(log_handler),
                    ctx: Some(ExecutionContext::new().with_cancellation(token)),
                },
            )
            .await;

        {
            let mut state = self.inner.state.lock().expect("session state lock");
            state.running = false;
            state.messages = result.messages.clone();
            state.shared_state = result.shared_state.clone();
            state.latest = Some(result.clone());
        }
        *self.inner.active_token.lock().expect("token lock") = None;

        self.inner.emit(
            "session_run_end",
            json_map(json!({
                "status": serde_json::to_value(result.status).unwrap_or_default(),
                "cycles": result.cycles.len(),
                "final_answer": result.final_answer,
                "wait_reason": result.wait_reason,
                "error": result.error,
            })),
        );
        Ok(result)
    }
}

impl SessionInner {
    fn emit(&self, event: &str, payload: StateMap) {
        // Fan out without holding the listeners lock across callbacks.
        let listeners: Vec<SessionEventHandler> = self
            .listeners
            .lock()
            .expect("listeners lock")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event, &payload);
        }
    }

    fn drain_steering_for_cycle(&self, cycle_index: u32) -> Vec<Message> {
        let Some(prompt) = self.steering.lock().expect("steering lock").pop_front() else {
            return Vec::new();
        };
        self.emit(
            "session_steer_dequeued",
            json_map(json!({"cycle": cycle_index, "prompt": prompt})),
        );
        vec![Message::user(prompt)]
    }

    fn drain_steering_interrupt(&self) -> Vec<Message> {
        let Some(prompt) = self.steering.lock().expect("steering lock").pop_front() else {
            return Vec::new();
        };
        self.emit("session_steer_interrupt", json_map(json!({"prompt": prompt})));
        vec![Message::user(prompt)]
    }
}

fn json_map(value: serde_json::Value) -> StateMap {
    value.as_object().cloned().unwrap_or_default()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
