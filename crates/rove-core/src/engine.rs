// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use rove_exec::{CycleExecutor, ExecutionBackend, ExecutionContext, InlineBackend, RunState};
use rove_memory::{MemoryManager, SummaryBackend};
use rove_model::LlmClient;
use rove_tools::{SubTaskRunner, ToolContext, ToolRegistry};
use rove_types::{
    read_bool, read_str, read_u64, shared_state, summarize_task_token_usage, AgentResult, AgentStatus,
    AgentTask, Message, NoToolPolicy, SharedState, StateMap, ToolCall, ToolDirective, ToolExecutionResult,
};
use rove_workspace::{LocalWorkspaceBackend, WorkspaceBackend};

use crate::cycle::CycleRunner;
use crate::hooks::HookManager;
use crate::sub_task::EngineSubTaskRunner;
use crate::tool_runner::ToolCallRunner;

/// Structured log event sink: `(event_name, payload)`.
pub type LogHandler = Arc<dyn Fn(&str, &StateMap) + Send + Sync>;

/// Supplies messages to append before a cycle's model call (steering).
pub type BeforeCycleProvider = Arc<dyn Fn(u32, &[Message], &StateMap) -> Vec<Message> + Send + Sync>;

/// Supplies messages mid-cycle; a non-empty return trips the
/// skipped-due-to-steering branch of the tool-call runner.
pub type InterruptionProvider = Arc<dyn Fn() -> Vec<Message> + Send + Sync>;

/// Builds fresh LLM clients for sub-agents that name a different backend or
/// model than their parent.  Returned map carries resolution info
/// (`model_id`, `backend`, …) for observability.
pub trait SubAgentClientResolver: Send + Sync {
    fn resolve(&self, backend: Option<&str>, model: &str)
        -> anyhow::Result<(Arc<dyn LlmClient>, BTreeMap<String, String>)>;
}

/// Per-run options for [`AgentRuntime::run_with`].
#[derive(Default)]
pub struct RunOptions {
    pub workspace: Option<PathBuf>,
    pub shared_state: Option<StateMap>,
    pub initial_messages: Option<Vec<Message>>,
    pub user_message: Option<String>,
    pub before_cycle_messages: Option<BeforeCycleProvider>,
    pub interruption_messages: Option<InterruptionProvider>,
    /// Overrides the engine's configured log handler for this run.
    pub log_handler: Option<LogHandler>,
    pub ctx: Option<ExecutionContext>,
}

/// The outer reason–act loop: owns the LLM client, tool registry, hook
/// manager, and execution backend, and drives tasks to a terminal
/// [`AgentResult`].
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    default_workspace: Option<PathBuf>,
    log_handler: Option<LogHandler>,
    log_preview_chars: usize,
    default_backend: Option<String>,
    hooks: Arc<HookManager>,
    execution_backend: Arc<dyn ExecutionBackend>,
    workspace_backend: Option<Arc<dyn WorkspaceBackend>>,
    sub_client_resolver: Option<Arc<dyn SubAgentClientResolver>>,
    registry_factory: Option<Arc<dyn Fn() -> ToolRegistry + Send + Sync>>,
    summary_backend: Option<Arc<dyn SummaryBackend>>,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            default_workspace: None,
            log_handler: None,
            log_preview_chars: 220,
            default_backend: None,
            hooks: Arc::new(HookManager::default()),
            execution_backend: Arc::new(InlineBackend::new()),
            workspace_backend: None,
            sub_client_resolver: None,
            registry_factory: None,
            summary_backend: None,
        }
    }

    pub fn with_default_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.default_workspace = Some(workspace.into());
        self
    }

    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    pub fn with_log_preview_chars(mut self, chars: usize) -> Self {
        self.log_preview_chars = chars.max(40);
        self
    }

    pub fn with_default_backend(mut self, backend: impl Into<String>) -> Self {
        self.default_backend = Some(backend.into());
        self
    }

    pub fn with_hooks(mut self, hooks: HookManager) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_execution_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.execution_backend = backend;
        self
    }

    pub fn with_workspace_backend(mut self, backend: Arc<dyn WorkspaceBackend>) -> Self {
        self.workspace_backend = Some(backend);
        self
    }

    pub fn with_sub_client_resolver(mut self, resolver: Arc<dyn SubAgentClientResolver>) -> Self {
        self.sub_client_resolver = Some(resolver);
        self
    }

    pub fn with_registry_factory(mut self, factory: Arc<dyn Fn() -> ToolRegistry + Send + Sync>) -> Self {
        self.registry_factory = Some(factory);
        self
    }

    pub fn with_summary_backend(mut self, summary: Arc<dyn SummaryBackend>) -> Self {
        self.summary_backend = Some(summary);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run a task with default options.
    pub async fn run(&self, task: AgentTask) -> AgentResult {
        self.run_with(task, RunOptions::default()).await
    }

    /// Run a task.  The returned result is always terminal: completed,
    /// waiting for the user, failed, or out of cycle budget.
    pub async fn run_with(&self, task: AgentTask, opts: RunOptions) -> AgentResult {
        let workspace = self.prepare_workspace(opts.workspace.as_deref());
        let shared = shared_state(Some(seed_shared_state(opts.shared_state, &task)));
        let messages = build_initial_messages(&task, opts.initial_messages, opts.user_message);
        let log = opts.log_handler.or_else(|| self.log_handler.clone());

        emit(
            &log,
            "run_started",
            json!({
                "task_id": task.task_id,
                "model": task.model,
                "workspace": workspace.display().to_string(),
                "max_cycles": task.max_cycles,
            }),
        );

        let executor = self.build_cycle_executor(
            &task,
            &workspace,
            log.clone(),
            opts.before_cycle_messages,
            opts.interruption_messages,
            &shared,
            opts.ctx.as_ref(),
        );

        let max_cycles = task.max_cycles.max(1);
        let state = RunState::new(messages, shared);
        let result = self
            .execution_backend
            .execute(&task, state, executor, opts.ctx, max_cycles)
            .await;

        if result.status == AgentStatus::MaxCycles {
            emit(&log, "run_max_cycles", json!({"task_id": task.task_id, "cycles": result.cycles.len()}));
        }
        result
    }

    /// Wire one cycle's worth of machinery for `task`.  Also used by the
    /// distributed cycle worker, which drives exactly one cycle per call.
    pub fn build_cycle_executor(
        &self,
        task: &AgentTask,
        workspace: &Path,
        log: Option<LogHandler>,
        before_cycle: Option<BeforeCycleProvider>,
        interruption: Option<InterruptionProvider>,
        shared: &SharedState,
        ctx: Option<&ExecutionContext>,
    ) -> Arc<dyn CycleExecutor> {
        let workspace_backend: Arc<dyn WorkspaceBackend> = self
            .workspace_backend
            .clone()
            .unwrap_or_else(|| Arc::new(LocalWorkspaceBackend::new(workspace)));
        let memory = Arc::new(self.build_memory_manager(task, Arc::clone(&workspace_backend)));
        let sub_runner = self.build_sub_task_runner(task, workspace, shared, ctx, log.clone());

        Arc::new(EngineCycleExecutor {
            task: task.clone(),
            workspace: workspace.to_path_buf(),
            workspace_backend,
            memory,
            cycle_runner: CycleRunner::new(Arc::clone(&self.llm), Arc::clone(&self.registry), Arc::clone(&self.hooks)),
            tool_runner: ToolCallRunner::new(Arc::clone(&self.registry), Arc::clone(&self.hooks)),
            before_cycle,
            interruption,
            log,
            log_preview_chars: self.log_preview_chars,
            sub_runner,
        })
    }

    fn build_sub_task_runner(
        &self,
        task: &AgentTask,
        workspace: &Path,
        shared: &SharedState,
        ctx: Option<&ExecutionContext>,
        log: Option<LogHandler>,
    ) -> Option<Arc<EngineSubTaskRunner>> {
        if !task.sub_agents_enabled() {
            return None;
        }
        Some(Arc::new(EngineSubTaskRunner::new(
            task.clone(),
            workspace.to_path_buf(),
            shared.clone(),
            ctx.cloned(),
            Arc::clone(&self.llm),
            self.sub_client_resolver.clone(),
            Arc::clone(&self.registry),
            self.registry_factory.clone(),
            self.default_backend.clone(),
            Arc::clone(&self.execution_backend),
            log,
            self.log_preview_chars,
            self.summary_backend.clone(),
        )))
    }

    fn build_memory_manager(&self, task: &AgentTask, workspace_backend: Arc<dyn WorkspaceBackend>) -> MemoryManager {
        let md = &task.metadata;
        let mut memory = MemoryManager::new(task.memory_compact_threshold)
            .with_keep_recent_messages(read_u64(md, "memory_keep_recent_messages", 10, 1) as usize)
            .with_memory_warning(
                read_bool(md, "include_memory_warning", false),
                task.memory_threshold_percentage.clamp(1, 100),
            )
            .with_tool_result_limits(
                read_u64(md, "tool_result_compact_threshold", 2_000, 0) as usize,
                read_u64(md, "tool_result_keep_last", 3, 0) as usize,
                read_u64(md, "tool_result_excerpt_head", 200, 0) as usize,
                read_u64(md, "tool_result_excerpt_tail", 200, 0) as usize,
            )
            .with_tool_calls_keep_last(read_u64(md, "tool_calls_keep_last", 3, 0) as usize)
            .with_assistant_no_tool_keep_last(read_u64(md, "assistant_no_tool_keep_last", 1, 0) as usize)
            .with_artifact_dir(read_str(md, "tool_result_artifact_dir").unwrap_or_else(|| ".memory/tool_results".into()))
            .with_summary_event_limit(read_u64(md, "summary_event_limit", 40, 1) as usize);
        if task.use_workspace {
            memory = memory.with_workspace_backend(workspace_backend);
        }
        if let Some(summary) = &self.summary_backend {
            let backend_name = read_str(md, "memory_summary_backend").or_else(|| self.default_backend.clone());
            let model = read_str(md, "memory_summary_model").or_else(|| Some(task.model.clone()));
            memory = memory.with_summary_backend(Arc::clone(summary), backend_name, model);
        }
        memory
    }

    fn prepare_workspace(&self, workspace: Option<&Path>) -> PathBuf {
        let target = workspace
            .map(Path::to_path_buf)
            .or_else(|| self.default_workspace.clone())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join(".rove-workspace"));
        if let Err(err) = std::fs::create_dir_all(&target) {
            warn!(path = %target.display(), error = %err, "failed to create workspace directory");
        }
        target
    }
}

// ─── Run assembly helpers ─────────────────────────────────────────────────────

fn seed_shared_state(seed: Option<StateMap>, task: &AgentTask) -> StateMap {
    let mut shared = seed.unwrap_or_default();
    shared
        .entry("todo_list".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    // Skill context travels from task metadata unless the caller already set it.
    for (shared_key, metadata_keys) in [
        ("available_skills", &["available_skills", "skill_directories"][..]),
        ("bound_skills", &["bound_skills"][..]),
        ("active_skills", &["active_skills"][..]),
    ] {
        if shared.contains_key(shared_key) {
            continue;
        }
        for key in metadata_keys {
            if let Some(value) = task.metadata.get(*key) {
                if !value.is_null() {
                    shared.insert(shared_key.to_string(), value.clone());
                    break;
                }
            }
        }
    }
    shared
}

fn build_initial_messages(task: &AgentTask, initial: Option<Vec<Message>>, user_message: Option<String>) -> Vec<Message> {
    if let Some(initial) = initial {
        let mut prepared = initial;
        let has_system = prepared.first().is_some_and(|m| m.role == rove_types::Role::System);
        if !has_system {
            prepared.insert(0, Message::system(task.system_prompt.clone()));
        }
        let to_append = user_message.unwrap_or_else(|| task.user_prompt.clone());
        if !to_append.is_empty() {
            prepared.push(Message::user(to_append));
        }
        return prepared;
    }
    let first_user = user_message.unwrap_or_else(|| task.user_prompt.clone());
    vec![Message::system(task.system_prompt.clone()), Message::user(first_user)]
}

fn emit(log: &Option<LogHandler>, event: &str, payload: Value) {
    if let Some(handler) = log {
        let map = payload.as_object().cloned().unwrap_or_default();
        handler(event, &map);
    }
}

fn preview(text: &str, limit: usize) -> String {
    let cleaned = text.replace('\n', " ").trim().to_string();
    if cleaned.chars().count() <= limit {
        return cleaned;
    }
    let truncated: String = cleaned.chars().take(limit.saturating_sub(3)).collect();
    format!("{truncated}...")
}

fn extract_final_message(result: &ToolExecutionResult) -> String {
    if let Some(Value::String(message)) = result.metadata.get("final_message") {
        if !message.is_empty() {
            return message.clone();
        }
    }
    if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(&result.content) {
        if let Some(Value::String(message)) = payload.get("message") {
            if !message.is_empty() {
                return message.clone();
            }
        }
    }
    result.content.clone()
}

fn continue_hint() -> String {
    "No tool call was produced. Continue the task and call `task_finish` when all todo items are done."
        .to_string()
}

// ─── Cycle executor ───────────────────────────────────────────────────────────

/// One run's inline cycle semantics, bound to its task and workspace.
struct EngineCycleExecutor {
    task: AgentTask,
    workspace: PathBuf,
    workspace_backend: Arc<dyn WorkspaceBackend>,
    memory: Arc<MemoryManager>,
    cycle_runner: CycleRunner,
    tool_runner: ToolCallRunner,
    before_cycle: Option<BeforeCycleProvider>,
    interruption: Option<InterruptionProvider>,
    log: Option<LogHandler>,
    log_preview_chars: usize,
    sub_runner: Option<Arc<EngineSubTaskRunner>>,
}

impl EngineCycleExecutor {
    fn emit(&self, event: &str, payload: Value) {
        emit(&self.log, event, payload);
    }

    fn preview(&self, text: &str) -> String {
        preview(text, self.log_preview_chars)
    }

    fn terminal(&self, state: &RunState, status: AgentStatus) -> AgentResult {
        AgentResult {
            status,
            messages: state.messages.clone(),
            cycles: state.cycles.clone(),
            final_answer: None,
            wait_reason: None,
            error: None,
            shared_state: state.shared.lock().expect("shared state lock").clone(),
            token_usage: summarize_task_token_usage(&state.cycles),
        }
    }

    fn failed(&self, state: &RunState, error: String) -> AgentResult {
        let mut result = self.terminal(state, AgentStatus::Failed);
        result.error = Some(error);
        result
    }

    fn completed(&self, state: &RunState, final_answer: String, cycle_index: u32) -> AgentResult {
        self.emit(
            "run_completed",
            json!({"cycle": cycle_index, "final_answer": self.preview(&final_answer)}),
        );
        let mut result = self.terminal(state, AgentStatus::Completed);
        result.final_answer = Some(final_answer);
        result
    }

    fn wait_user(&self, state: &RunState, wait_reason: String, cycle_index: u32) -> AgentResult {
        self.emit(
            "run_wait_user",
            json!({"cycle": cycle_index, "wait_reason": self.preview(&wait_reason)}),
        );
        let mut result = self.terminal(state, AgentStatus::WaitUser);
        result.wait_reason = Some(wait_reason);
        result
    }

    /// Previous cycle's reported total tokens and tool-call ids, used by the
    /// memory manager to size and protect its rewrites.
    fn last_cycle_hints(state: &RunState) -> (Option<u64>, Option<HashSet<String>>) {
        let Some(last) = state.cycles.last() else {
            return (None, None);
        };
        let usage = &last.token_usage;
        let mut total = usage.total_tokens;
        if total == 0 {
            total = usage.prompt_tokens + usage.completion_tokens;
        }
        let tokens = (total > 0).then_some(total);
        let ids: HashSet<String> = last
            .tool_calls
            .iter()
            .filter(|c| !c.id.is_empty())
            .map(|c| c.id.clone())
            .collect();
        (tokens, (!ids.is_empty()).then_some(ids))
    }
}

#[async_trait]
impl CycleExecutor for EngineCycleExecutor {
    async fn run_cycle(&self, cycle_index: u32, state: &mut RunState, ctx: Option<&ExecutionContext>) -> Option<AgentResult> {
        if let Some(provider) = &self.before_cycle {
            let shared_snapshot = state.shared.lock().expect("shared state lock").clone();
            let injected = provider(cycle_index, &state.messages, &shared_snapshot);
            if !injected.is_empty() {
                self.emit("cycle_injected_messages", json!({"cycle": cycle_index, "count": injected.len()}));
                state.messages.extend(injected);
            }
        }

        self.emit(
            "cycle_started",
            json!({
                "cycle": cycle_index,
                "max_cycles": self.task.max_cycles,
                "message_count": state.messages.len(),
            }),
        );

        let (previous_total_tokens, recent_tool_call_ids) = Self::last_cycle_hints(state);
        let outcome = self
            .cycle_runner
            .run_cycle(
                &self.task,
                &state.messages,
                cycle_index,
                &self.memory,
                previous_total_tokens,
                recent_tool_call_ids.as_ref(),
                &state.shared,
                ctx,
            )
            .await;

        let (next_messages, mut record) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                self.emit("cycle_failed", json!({"cycle": cycle_index, "error": err.to_string()}));
                return Some(self.failed(state, format!("LLM call failed in cycle {cycle_index}: {err}")));
            }
        };
        state.messages = next_messages;

        self.emit(
            "cycle_llm_response",
            json!({
                "cycle": cycle_index,
                "assistant_preview": self.preview(&record.assistant_message),
                "tool_calls": record.tool_calls.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                "tool_call_count": record.tool_calls.len(),
                "token_usage": serde_json::to_value(&record.token_usage).unwrap_or(Value::Null),
            }),
        );

        if record.tool_calls.is_empty() {
            let assistant_message = record.assistant_message.clone();
            state.cycles.push(record);
            return match self.task.no_tool_policy {
                NoToolPolicy::Finish => Some(self.completed(state, assistant_message, cycle_index)),
                NoToolPolicy::WaitUser => {
                    let reason = if assistant_message.is_empty() {
                        "No tool call and runtime is waiting for user.".to_string()
                    } else {
                        assistant_message
                    };
                    Some(self.wait_user(state, reason, cycle_index))
                }
                NoToolPolicy::Continue => {
                    if cycle_index < self.task.max_cycles {
                        state.messages.push(Message::user(continue_hint()));
                    }
                    None
                }
            };
        }

        let tool_calls = record.tool_calls.clone();
        let mut context = ToolContext::new(
            self.workspace.clone(),
            Arc::clone(&self.workspace_backend),
            state.shared.clone(),
        )
        .with_cycle_index(cycle_index);
        if let Some(sub_runner) = &self.sub_runner {
            context = context.with_sub_task_runner(Arc::clone(sub_runner) as Arc<dyn SubTaskRunner>);
        }
        if let Some(ctx) = ctx {
            context = context.with_execution_context(ctx.clone());
        }

        let log = self.log.clone();
        let preview_chars = self.log_preview_chars;
        let on_tool_result = move |call: &ToolCall, result: &ToolExecutionResult| {
            emit(
                &log,
                "tool_result",
                json!({
                    "cycle": cycle_index,
                    "tool_name": call.name,
                    "tool_call_id": result.tool_call_id,
                    "status": serde_json::to_value(result.status).unwrap_or(Value::Null),
                    "directive": serde_json::to_value(result.directive).unwrap_or(Value::Null),
                    "error_code": result.error_code,
                    "content_preview": preview(&result.content, preview_chars),
                }),
            );
        };

        let interruption = self.task.allow_interruption.then_some(()).and(self.interruption.as_ref());
        let run = self
            .tool_runner
            .run(
                &self.task,
                &tool_calls,
                &context,
                &mut state.messages,
                &mut record,
                interruption,
                &on_tool_result,
                ctx,
            )
            .await;

        let outcome = match run {
            Ok(outcome) => outcome,
            Err(_cancelled) => {
                state.cycles.push(record);
                return Some(self.failed(state, "Operation was cancelled".to_string()));
            }
        };
        state.cycles.push(record);

        if !outcome.interruption_messages.is_empty() {
            self.emit(
                "run_steered",
                json!({"cycle": cycle_index, "steering_count": outcome.interruption_messages.len()}),
            );
            state.messages.extend(outcome.interruption_messages);
        }

        match outcome.directive_result {
            Some(result) if result.directive == ToolDirective::WaitUser => {
                let reason = match result.metadata.get("question") {
                    Some(Value::String(question)) if !question.is_empty() => question.clone(),
                    _ => result.content.clone(),
                };
                Some(self.wait_user(state, reason, cycle_index))
            }
            Some(result) if result.directive == ToolDirective::Finish => {
                let final_answer = extract_final_message(&result);
                Some(self.completed(state, final_answer, cycle_index))
            }
            _ => None,
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
