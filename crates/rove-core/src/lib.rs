// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! The execution engine: hook pipeline, cycle runner, tool-call runner,
//! the outer `AgentRuntime` loop, sub-task spawning, the distributed cycle
//! worker, and the multi-turn session façade.

mod cycle;
mod engine;
mod hooks;
mod session;
mod sub_task;
mod tool_runner;
mod worker;

pub use cycle::CycleRunner;
pub use engine::{
    AgentRuntime, BeforeCycleProvider, InterruptionProvider, LogHandler, RunOptions, SubAgentClientResolver,
};
pub use hooks::{
    AfterLlmEvent, AfterToolCallEvent, BeforeLlmEvent, BeforeLlmPatch, BeforeMemoryCompactEvent,
    BeforeToolCallEvent, HookManager, RuntimeHook, ToolCallHookAction,
};
pub use session::{AgentSession, SessionEventHandler};
pub use sub_task::EngineSubTaskRunner;
pub use tool_runner::{ToolCallRunner, ToolRunOutcome};
pub use worker::{run_single_cycle, InProcessBroker, RecipeEngineBuilder};
