//! Event-sourced conversation threads.
//!
//! - [`event`]: immutable events and their typed payloads.
//! - [`status`]: the lifecycle state machine.
//! - [`projection`]: derived state, a pure fold over the log.
//! - [`manager`]: the [`Thread`] aggregate and its single writer.
//! - [`notify`]: post-append notification sinks.
//! - [`serializer`]: versioned snapshots, validation, fork, statistics.

pub mod event;
pub mod manager;
pub mod notify;
pub mod projection;
pub mod serializer;
pub mod status;

pub use event::{Event, EventData, EventMetadata, EventType, Stage};
pub use manager::{CheckpointRef, Thread, ThreadManager, generate_thread_id};
pub use notify::{
    BroadcastSink, CompositeSink, EventSink, FnSink, LoggingSink, NoopSink, ThreadNotification,
};
pub use projection::{DerivedState, LastError, QUESTION_TOOLS, project};
pub use serializer::{ThreadStatistics, ValidationReport, fork, thread_statistics, validate};
pub use status::ThreadStatus;
