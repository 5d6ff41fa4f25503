//! Convenience re-exports for common `weft` types.
//!
//! ```ignore
//! use weft::prelude::*;
//! ```
//!
//! Covers recording and persisting threads, the context optimizer, recovery,
//! and the collaborator traits. Wire-format helpers (`serializer`,
//! `tagged_date`) and the priority ordering functions are left out; import
//! those from their modules when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageRole, Result, ThreadError, ToolCall, ToolOutcome};

// ── Threads ─────────────────────────────────────────────────────────
pub use crate::thread::{
    BroadcastSink, CompositeSink, DerivedState, Event, EventData, EventMetadata, EventSink,
    EventType, FnSink, LoggingSink, NoopSink, Stage, Thread, ThreadManager, ThreadNotification,
    ThreadStatus, generate_thread_id,
};

// ── Storage ─────────────────────────────────────────────────────────
pub use crate::storage::{FileThreadStore, MemoryThreadStore, ThreadStore};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{
    ContextOptimizer, HeuristicScorer, OptimizationResult, OptimizerConfig, PriorityLevel,
    PriorityScorer, PromptContext, TokenEstimator,
};

// ── Recovery ────────────────────────────────────────────────────────
pub use crate::recovery::{RecoveryConfig, RecoveryManager, RecoveryResult, RecoveryStrategy};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::collab::{StepGenerator, ToolExecutor, TurnDriver, TurnOutcome};
pub use crate::config::EngineConfig;
