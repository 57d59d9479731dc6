// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Rove is an embeddable agent execution runtime: it drives a bounded,
//! observable reason–act loop over any LLM client and a registry of
//! side-effecting tools.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rove::{AgentRuntime, AgentTask};
//! use rove::model::EchoClient;
//! use rove::tools::build_default_registry;
//!
//! # async fn demo() {
//! let runtime = AgentRuntime::new(Arc::new(EchoClient), Arc::new(build_default_registry()));
//! let task = AgentTask::new("demo", "echo-model", "You are helpful.", "Say hi.");
//! let result = runtime.run(task).await;
//! println!("{:?}", result.status);
//! # }
//! ```

pub use rove_core::{
    AgentRuntime, AgentSession, BeforeCycleProvider, CycleRunner, HookManager, InProcessBroker,
    InterruptionProvider, LogHandler, RunOptions, RuntimeHook, SessionEventHandler, SubAgentClientResolver,
    ToolCallHookAction, ToolCallRunner,
};
pub use rove_types::{
    AgentResult, AgentStatus, AgentTask, Checkpoint, CycleRecord, Message, NoToolPolicy, Role, SubAgentConfig,
    SubTaskOutcome, SubTaskRequest, TaskTokenUsage, TokenUsage, ToolCall, ToolDirective, ToolExecutionResult,
};

pub mod core {
    pub use rove_core::*;
}

pub mod exec {
    pub use rove_exec::*;
}

pub mod memory {
    pub use rove_memory::*;
}

pub mod model {
    pub use rove_model::*;
}

pub mod tools {
    pub use rove_tools::*;
}

pub mod types {
    pub use rove_types::*;
}

pub mod workspace {
    pub use rove_workspace::*;
}
