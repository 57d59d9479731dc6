// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use rove_types::{StateMap, ToolExecutionResult};

use crate::context::ToolContext;

/// Trait every built-in and user-defined tool implements.
///
/// Handlers should encode failures as error results where the model can
/// recover; a returned `Err` is converted by the dispatcher into a
/// `handler_exception` error result, it never aborts the run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult>;
}

/// Central registry mapping tool names to handlers.
///
/// Immutable after construction; all lookup methods take `&self`, so the
/// registry is shared freely across concurrent runs.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Provider-neutral `{name, description, parameters}` schema for one tool.
    pub fn schema_for(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.parameters_schema(),
            })
        })
    }

    /// Schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<Value> {
        let mut schemas: Vec<Value> = self
            .names()
            .iter()
            .filter_map(|name| self.schema_for(name))
            .collect();
        schemas.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        schemas
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
