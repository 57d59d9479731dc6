// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use rove_exec::{ExecutionBackend, ExecutionContext};
use rove_memory::SummaryBackend;
use rove_model::LlmClient;
use rove_tools::{SubTaskRunner, ToolRegistry, BATCH_SUB_TASKS_TOOL, CREATE_SUB_TASK_TOOL};
use rove_types::{
    read_str, AgentTask, NoToolPolicy, SharedState, StateMap, SubAgentConfig, SubTaskOutcome, SubTaskRequest,
};

use crate::engine::{AgentRuntime, LogHandler, RunOptions, SubAgentClientResolver};

/// Runs sub-tasks as nested, isolated engine invocations.
///
/// Each sub-task gets a fresh runtime and shared state, a child cancellation
/// token (parent cancel propagates down, sub-task failures stay contained),
/// and a tool set with the sub-agent tools stripped so delegation cannot
/// nest.
#[derive(Clone)]
pub struct EngineSubTaskRunner {
    parent_task: AgentTask,
    workspace: PathBuf,
    parent_shared: SharedState,
    parent_ctx: Option<ExecutionContext>,
    llm: Arc<dyn LlmClient>,
    resolver: Option<Arc<dyn SubAgentClientResolver>>,
    registry: Arc<ToolRegistry>,
    registry_factory: Option<Arc<dyn Fn() -> ToolRegistry + Send + Sync>>,
    default_backend: Option<String>,
    execution_backend: Arc<dyn ExecutionBackend>,
    log_handler: Option<LogHandler>,
    log_preview_chars: usize,
    summary_backend: Option<Arc<dyn SummaryBackend>>,
}

impl EngineSubTaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        parent_task: AgentTask,
        workspace: PathBuf,
        parent_shared: SharedState,
        parent_ctx: Option<ExecutionContext>,
        llm: Arc<dyn LlmClient>,
        resolver: Option<Arc<dyn SubAgentClientResolver>>,
        registry: Arc<ToolRegistry>,
        registry_factory: Option<Arc<dyn Fn() -> ToolRegistry + Send + Sync>>,
        default_backend: Option<String>,
        execution_backend: Arc<dyn ExecutionBackend>,
        log_handler: Option<LogHandler>,
        log_preview_chars: usize,
        summary_backend: Option<Arc<dyn SummaryBackend>>,
    ) -> Self {
        Self {
            parent_task,
            workspace,
            parent_shared,
            parent_ctx,
            llm,
            resolver,
            registry,
            registry_factory,
            default_backend,
            execution_backend,
            log_handler,
            log_preview_chars,
            summary_backend,
        }
    }

    async fn run_request(&self, request: SubTaskRequest) -> SubTaskOutcome {
        let sub_task_id = format!(
            "{}_sub_{}_{}",
            self.parent_task.task_id,
            request.agent_name,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let Some(config) = self.parent_task.sub_agents.get(&request.agent_name) else {
            let available: Vec<&str> = self.parent_task.sub_agents.keys().map(String::as_str).collect();
            return SubTaskOutcome::failed(
                sub_task_id,
                request.agent_name.clone(),
                format!(
                    "Unknown sub-agent '{}'. Available: {}",
                    request.agent_name,
                    available.join(", ")
                ),
            );
        };

        let (client, model_id, resolved) = match self.resolve_client(config) {
            Ok(resolution) => resolution,
            Err(err) => return SubTaskOutcome::failed(sub_task_id, request.agent_name.clone(), err.to_string()),
        };

        let sub_task = self.build_sub_task(&sub_task_id, &request, config, &model_id);
        let sub_runtime = self.build_sub_runtime(client, &request.agent_name);
        debug!(sub_task_id = %sub_task_id, agent = %request.agent_name, model = %model_id, "spawning sub-task");

        let sub_result = sub_runtime
            .run_with(
                sub_task,
                RunOptions {
                    workspace: Some(self.workspace.clone()),
                    shared_state: Some(fresh_sub_shared_state()),
                    ctx: self.parent_ctx.as_ref().map(ExecutionContext::child),
                    ..Default::default()
                },
            )
            .await;

        SubTaskOutcome {
            task_id: sub_task_id,
            agent_name: request.agent_name,
            status: sub_result.status,
            final_answer: sub_result.final_answer.clone(),
            wait_reason: sub_result.wait_reason.clone(),
            error: sub_result.error.clone(),
            cycles: sub_result.cycles.len() as u32,
            todo_list: sub_result.todo_list(),
            resolved,
        }
    }

    fn resolve_client(
        &self,
        config: &SubAgentConfig,
    ) -> anyhow::Result<(Arc<dyn LlmClient>, String, BTreeMap<String, String>)> {
        if let Some(resolver) = &self.resolver {
            let backend = config.backend.clone().or_else(|| self.default_backend.clone());
            let (client, resolved) = resolver.resolve(backend.as_deref(), &config.model)?;
            let model_id = resolved.get("model_id").cloned().unwrap_or_else(|| config.model.clone());
            return Ok((client, model_id, resolved));
        }
        if config.model == self.parent_task.model {
            return Ok((Arc::clone(&self.llm), config.model.clone(), BTreeMap::new()));
        }
        anyhow::bail!(
            "Sub-agent model resolution requires a client resolver when the sub-agent model differs from the parent model"
        )
    }

    fn build_sub_task(
        &self,
        sub_task_id: &str,
        request: &SubTaskRequest,
        config: &SubAgentConfig,
        model_id: &str,
    ) -> AgentTask {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| format!("You are a focused sub-agent. {}", config.description));

        let mut user_prompt = request.task_description.clone();
        if !request.output_requirements.is_empty() {
            user_prompt.push_str(&format!(
                "\n\n<Output Requirements>\n{}\n</Output Requirements>",
                request.output_requirements
            ));
        }
        if request.include_main_summary {
            let summary = self.build_parent_summary();
            if !summary.is_empty() {
                user_prompt.push_str(&format!("\n\n<Main Task Summary>\n{summary}\n</Main Task Summary>"));
            }
        }

        let mut excluded: Vec<String> = self.parent_task.exclude_tools.clone();
        excluded.extend(config.exclude_tools.iter().cloned());
        excluded.push(CREATE_SUB_TASK_TOOL.to_string());
        excluded.push(BATCH_SUB_TASKS_TOOL.to_string());
        excluded.sort();
        excluded.dedup();

        let mut metadata = StateMap::new();
        metadata.insert("is_sub_task".into(), json!(true));
        metadata.insert("parent_task_id".into(), json!(self.parent_task.task_id));
        metadata.insert("sub_agent_name".into(), json!(request.agent_name));
        if let Some(language) = read_str(&self.parent_task.metadata, "language") {
            metadata.insert("language".into(), json!(language));
        }
        for (key, value) in &request.metadata {
            metadata.insert(key.clone(), value.clone());
        }

        let mut sub_task = AgentTask::new(sub_task_id, model_id, system_prompt, user_prompt);
        sub_task.max_cycles = config.max_cycles.max(1);
        sub_task.memory_compact_threshold = self.parent_task.memory_compact_threshold;
        sub_task.memory_threshold_percentage = self.parent_task.memory_threshold_percentage;
        sub_task.no_tool_policy = NoToolPolicy::Continue;
        sub_task.allow_interruption = false;
        sub_task.use_workspace = self.parent_task.use_workspace;
        sub_task.native_multimodal = self.parent_task.native_multimodal;
        sub_task.extra_tool_names = self.parent_task.extra_tool_names.clone();
        sub_task.exclude_tools = excluded;
        sub_task.metadata = metadata;
        sub_task
    }

    fn build_sub_runtime(&self, client: Arc<dyn LlmClient>, agent_name: &str) -> AgentRuntime {
        let registry = match &self.registry_factory {
            Some(factory) => Arc::new(factory()),
            None => Arc::clone(&self.registry),
        };
        let mut runtime = AgentRuntime::new(client, registry)
            .with_default_workspace(self.workspace.clone())
            .with_log_preview_chars(self.log_preview_chars);
        if let Some(backend) = &self.default_backend {
            runtime = runtime.with_default_backend(backend.clone());
        }
        if let Some(resolver) = &self.resolver {
            runtime = runtime.with_sub_client_resolver(Arc::clone(resolver));
        }
        if let Some(factory) = &self.registry_factory {
            runtime = runtime.with_registry_factory(Arc::clone(factory));
        }
        if let Some(summary) = &self.summary_backend {
            runtime = runtime.with_summary_backend(Arc::clone(summary));
        }
        if let Some(log) = self.sub_log_handler(agent_name) {
            runtime = runtime.with_log_handler(log);
        }
        runtime
    }

    /// Re-emit sub-agent events through the parent handler with a
    /// `sub_agent_` prefix and the agent's name in the payload.
    fn sub_log_handler(&self, agent_name: &str) -> Option<LogHandler> {
        let parent = self.log_handler.clone()?;
        let agent_name = agent_name.to_string();
        Some(Arc::new(move |event: &str, payload: &StateMap| {
            let mut enriched = payload.clone();
            enriched.insert("sub_agent_name".into(), json!(agent_name));
            parent(&format!("sub_agent_{event}"), &enriched);
        }))
    }

    fn build_parent_summary(&self) -> String {
        let mut lines = vec![format!("Parent task goal: {}", self.parent_task.user_prompt)];
        let shared = self.parent_shared.lock().expect("shared state lock");
        if let Some(Value::Array(todos)) = shared.get("todo_list") {
            if !todos.is_empty() {
                lines.push("Parent TODO status:".to_string());
                for item in todos {
                    let title = item.get("title").and_then(Value::as_str).unwrap_or("Untitled");
                    let status = item.get("status").and_then(Value::as_str).unwrap_or("pending");
                    lines.push(format!("- [{status}] {title}"));
                }
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl SubTaskRunner for EngineSubTaskRunner {
    async fn run(&self, request: SubTaskRequest) -> SubTaskOutcome {
        self.run_request(request).await
    }

    async fn run_batch(&self, requests: Vec<(usize, SubTaskRequest)>) -> Vec<(usize, SubTaskOutcome)> {
        let jobs: Vec<BoxFuture<'static, (usize, SubTaskOutcome)>> = requests
            .into_iter()
            .map(|(index, request)| {
                let runner = self.clone();
                let job: BoxFuture<'static, (usize, SubTaskOutcome)> =
                    Box::pin(async move { (index, runner.run_request(request).await) });
                job
            })
            .collect();
        self.execution_backend.dispatch_batch(jobs).await
    }
}

fn fresh_sub_shared_state() -> StateMap {
    let mut shared = StateMap::new();
    shared.insert("todo_list".into(), Value::Array(Vec::new()));
    shared
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
