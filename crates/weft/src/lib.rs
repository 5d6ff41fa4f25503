//! Event-sourced conversation threads for tool-using assistants.
//!
//! `weft` records every conversational step as an immutable event in an
//! append-only log, derives the conversation's state by folding over that
//! log, keeps a token-budgeted context window for the language model, and
//! restores threads after failures. It never calls a model or runs a tool
//! itself: those are collaborators behind the [`StepGenerator`](collab::StepGenerator)
//! and [`ToolExecutor`](collab::ToolExecutor) traits.
//!
//! # Getting started
//!
//! ```ignore
//! use weft::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> weft::Result<()> {
//!     let store = FileThreadStore::new(".weft/threads");
//!
//!     let mut thread = ThreadManager::new(generate_thread_id());
//!     thread.start_conversation("Create a task called launch review")?;
//!     thread.add_assistant_message("Sure. When is it due?")?;
//!     store.save(thread.thread_id(), thread.thread()).await?;
//!
//!     let optimizer = ContextOptimizer::from_thread(thread.thread(), OptimizerConfig::default());
//!     println!("{}", optimizer.usage().to_log_string());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Record events and drive the lifecycle:** [`ThreadManager`](thread::ThreadManager)
//!   is the single writer of a [`Thread`](thread::Thread). Status moves
//!   through the [`ThreadStatus`](thread::ThreadStatus) state machine.
//!
//! - **Read the conversation's state:** [`DerivedState`](thread::DerivedState),
//!   recomputed by [`project`](thread::project) after every append.
//!
//! - **Observe appends:** implement [`EventSink`](thread::EventSink), or use
//!   [`LoggingSink`](thread::LoggingSink) and [`BroadcastSink`](thread::BroadcastSink).
//!
//! - **Persist threads:** the [`ThreadStore`](storage::ThreadStore) port,
//!   with in-memory and file backends. Snapshots are versioned JSON; see
//!   [`thread::serializer`].
//!
//! - **Keep the prompt within budget:** [`ContextOptimizer`](context::ContextOptimizer)
//!   with a pluggable [`PriorityScorer`](context::PriorityScorer).
//!
//! - **Recover from failures:** [`RecoveryManager`](recovery::RecoveryManager)
//!   diagnoses a thread and applies a [`RecoveryStrategy`](recovery::RecoveryStrategy).
//!
//! - **Run turns against a model and tools:** [`TurnDriver`](collab::TurnDriver).

pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod prelude;
pub mod recovery;
pub mod storage;
pub mod thread;

pub use error::{Result, ThreadError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the model-facing window.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        })
    }
}

/// A message as the model sees it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// A tool invocation proposed by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// What a [`ToolExecutor`](collab::ToolExecutor) reports back.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}
