//! The [`Thread`] aggregate and its single writer, [`ThreadManager`].
//!
//! Every mutation is one atomic step: check the status machine, append the
//! event, recompute [`DerivedState`] from scratch, notify the sink. A call
//! that fails any check leaves the log untouched.
//!
//! A `ThreadManager` is the lease holder for one thread. Concurrent writers
//! to the same thread id are a caller error; see
//! [`ThreadStore`](crate::storage::ThreadStore) for the persistence policy.

use crate::context::OptimizationResult;
use crate::error::{Result, ThreadError};
use crate::thread::event::{Event, EventData, EventMetadata, EventType};
use crate::thread::notify::{EventSink, NoopSink, ThreadNotification};
use crate::thread::projection::{DerivedState, is_question_tool, project};
use crate::thread::serializer::{tagged_date, validate};
use crate::thread::ThreadStatus;
use crate::{ToolCall, ToolOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// ── Thread ─────────────────────────────────────────────────────────

/// One conversation: identity, lifecycle status, and the full event log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub thread_id: String,
    #[serde(with = "tagged_date")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "tagged_date")]
    pub updated_at: DateTime<Utc>,
    pub status: ThreadStatus,
    pub events: Vec<Event>,
}

/// A `checkpoint_created` marker found in a thread's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRef {
    /// Position of the marker event itself.
    pub position: usize,
    pub checkpoint_id: String,
    pub label: Option<String>,
    /// Number of events the checkpoint snapshot covers.
    pub event_index: usize,
}

impl Thread {
    /// Derived view of the log. Recomputed on every call.
    pub fn derived_state(&self) -> DerivedState {
        project(&self.events)
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// All checkpoint markers, oldest first.
    pub fn checkpoints(&self) -> Vec<CheckpointRef> {
        self.events
            .iter()
            .enumerate()
            .filter_map(|(position, event)| checkpoint_ref(position, event))
            .collect()
    }

    /// The most recent checkpoint marker (backward scan).
    pub fn latest_checkpoint(&self) -> Option<CheckpointRef> {
        self.events
            .iter()
            .enumerate()
            .rev()
            .find_map(|(position, event)| checkpoint_ref(position, event))
    }
}

fn checkpoint_ref(position: usize, event: &Event) -> Option<CheckpointRef> {
    match &event.data {
        EventData::CheckpointCreated {
            checkpoint_id,
            label,
            event_index,
        } => Some(CheckpointRef {
            position,
            checkpoint_id: checkpoint_id.clone(),
            label: label.clone(),
            event_index: *event_index,
        }),
        _ => None,
    }
}

/// Generate a fresh thread id.
pub fn generate_thread_id() -> String {
    format!("thread_{}", uuid::Uuid::new_v4().simple())
}

// ── ThreadManager ──────────────────────────────────────────────────

/// Owns a live [`Thread`] and appends events to it.
pub struct ThreadManager {
    thread: Thread,
    state: DerivedState,
    sink: Arc<dyn EventSink>,
}

impl ThreadManager {
    /// Start a new thread in `idle` with its `thread_created` event.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self::create(thread_id.into(), None)
    }

    /// Start a new thread that records the thread it was derived from.
    pub fn with_parent(thread_id: impl Into<String>, parent_thread_id: impl Into<String>) -> Self {
        Self::create(thread_id.into(), Some(parent_thread_id.into()))
    }

    fn create(thread_id: String, parent_thread_id: Option<String>) -> Self {
        let now = Utc::now();
        let created = Event::new(
            EventData::ThreadCreated {
                parent_thread_id,
                user_id: None,
            },
            EventMetadata::new(),
            now,
        );
        let thread = Thread {
            thread_id,
            created_at: now,
            updated_at: now,
            status: ThreadStatus::Idle,
            events: vec![created],
        };
        let state = project(&thread.events);
        Self {
            thread,
            state,
            sink: Arc::new(NoopSink),
        }
    }

    /// Take over an existing thread (e.g. one loaded from storage).
    ///
    /// Fails with [`ThreadError::Validation`] if the log is malformed.
    pub fn from_thread(thread: Thread) -> Result<Self> {
        validate(&thread).into_result()?;
        let state = project(&thread.events);
        Ok(Self {
            thread,
            state,
            sink: Arc::new(NoopSink),
        })
    }

    /// Attach a notification sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    // ── Accessors ──

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn thread_id(&self) -> &str {
        &self.thread.thread_id
    }

    pub fn status(&self) -> ThreadStatus {
        self.thread.status
    }

    pub fn events(&self) -> &[Event] {
        &self.thread.events
    }

    pub fn state(&self) -> &DerivedState {
        &self.state
    }

    /// A copy of the thread for readers.
    pub fn snapshot(&self) -> Thread {
        self.thread.clone()
    }

    pub fn into_thread(self) -> Thread {
        self.thread
    }

    // ── Core append ──

    /// Append an event without changing status.
    ///
    /// `thread_created` can only be the first event and is rejected here.
    pub fn append_event(&mut self, data: EventData, metadata: EventMetadata) -> Result<Event> {
        if data.event_type() == EventType::ThreadCreated {
            return Err(ThreadError::invalid(format!(
                "thread {} already has a thread_created event",
                self.thread.thread_id
            )));
        }
        self.append(data, metadata, None)
    }

    fn append(
        &mut self,
        data: EventData,
        metadata: EventMetadata,
        next_status: Option<ThreadStatus>,
    ) -> Result<Event> {
        let current = self.thread.status;
        if current.is_terminal() {
            return Err(ThreadError::ThreadClosed {
                thread_id: self.thread.thread_id.clone(),
                status: current,
            });
        }
        if let Some(next) = next_status
            && !current.can_transition_to(next)
        {
            return Err(ThreadError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        let timestamp = self.next_timestamp();
        let event = Event::new(data, metadata, timestamp);
        self.thread.events.push(event.clone());
        self.thread.updated_at = timestamp;
        if let Some(next) = next_status {
            self.thread.status = next;
        }
        self.state = project(&self.thread.events);

        self.sink.notify(&ThreadNotification {
            thread_id: self.thread.thread_id.clone(),
            event_type: event.data.type_name().to_string(),
            status: self.thread.status,
            event: event.clone(),
        });
        Ok(event)
    }

    /// Wall clock, clamped so timestamps never go backwards within the log.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.thread.events.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }

    // ── Convenience mutators ──

    /// Record the opening user message and move `idle` to `active`.
    pub fn start_conversation(&mut self, content: impl Into<String>) -> Result<Event> {
        self.append(
            EventData::UserMessage {
                content: content.into(),
            },
            EventMetadata::new(),
            Some(ThreadStatus::Active),
        )
    }

    /// A user message answers any outstanding question, so the thread is
    /// active afterwards.
    pub fn add_user_message(&mut self, content: impl Into<String>) -> Result<Event> {
        self.append(
            EventData::UserMessage {
                content: content.into(),
            },
            EventMetadata::new(),
            Some(ThreadStatus::Active),
        )
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) -> Result<Event> {
        self.append(
            EventData::AssistantMessage {
                content: content.into(),
            },
            EventMetadata::new(),
            None,
        )
    }

    /// Record a tool call produced by the model. Question tools move the
    /// thread to `waiting_input`.
    pub fn add_tool_call_generated(
        &mut self,
        tool_call: ToolCall,
        reasoning: Option<String>,
    ) -> Result<Event> {
        let next = is_question_tool(&tool_call.name).then_some(ThreadStatus::WaitingInput);
        let metadata = EventMetadata::new().with_tool_name(tool_call.name.clone());
        self.append(
            EventData::ToolCallGenerated {
                tool_call,
                reasoning,
            },
            metadata,
            next,
        )
    }

    pub fn add_tool_executed(
        &mut self,
        tool_call: &ToolCall,
        outcome: ToolOutcome,
        execution_time_ms: Option<u64>,
    ) -> Result<Event> {
        let mut metadata = EventMetadata::new().with_tool_name(tool_call.name.clone());
        metadata.execution_time_ms = execution_time_ms;
        self.append(
            EventData::ToolExecuted {
                tool_call_id: tool_call.id.clone(),
                tool_name: tool_call.name.clone(),
                success: outcome.success,
                result: outcome.data,
                error: outcome.error,
            },
            metadata,
            None,
        )
    }

    /// Move to a new stage; `from` is taken from the derived state.
    pub fn add_stage_changed(&mut self, to: crate::thread::Stage) -> Result<Event> {
        let from = self.state.stage;
        self.append(
            EventData::StageChanged { from, to },
            EventMetadata::new().with_stage(to),
            None,
        )
    }

    pub fn add_info_collected(&mut self, category: impl Into<String>, value: Value) -> Result<Event> {
        self.append(
            EventData::InfoCollected {
                category: category.into(),
                value,
            },
            EventMetadata::new(),
            None,
        )
    }

    /// Record an error. Recoverable errors leave the thread `active`;
    /// anything else fails it.
    pub fn add_error(
        &mut self,
        message: impl Into<String>,
        recoverable: bool,
        code: Option<String>,
    ) -> Result<Event> {
        let next = if recoverable {
            ThreadStatus::Active
        } else {
            ThreadStatus::Failed
        };
        self.append(
            EventData::ErrorOccurred {
                message: message.into(),
                recoverable,
                code,
            },
            EventMetadata::new(),
            Some(next),
        )
    }

    pub fn complete(&mut self, summary: Option<String>) -> Result<Event> {
        self.append(
            EventData::ConversationCompleted { summary },
            EventMetadata::new(),
            Some(ThreadStatus::Completed),
        )
    }

    pub fn pause(&mut self, reason: Option<String>) -> Result<Event> {
        self.append(
            EventData::ConversationPaused { reason },
            EventMetadata::new(),
            Some(ThreadStatus::Paused),
        )
    }

    /// Resume a `paused` or `waiting_input` thread.
    pub fn resume(&mut self, reason: Option<String>) -> Result<Event> {
        if !self.thread.status.is_suspended() {
            return Err(ThreadError::InvalidTransition {
                from: self.thread.status,
                to: ThreadStatus::Active,
            });
        }
        self.append(
            EventData::ConversationResumed { reason },
            EventMetadata::new(),
            Some(ThreadStatus::Active),
        )
    }

    pub fn cancel(&mut self, reason: Option<String>) -> Result<Event> {
        self.append(
            EventData::ConversationCancelled { reason },
            EventMetadata::new(),
            Some(ThreadStatus::Cancelled),
        )
    }

    /// Append a checkpoint marker covering every event before it.
    pub fn add_checkpoint(
        &mut self,
        checkpoint_id: impl Into<String>,
        label: Option<String>,
    ) -> Result<Event> {
        let event_index = self.thread.events.len();
        self.append(
            EventData::CheckpointCreated {
                checkpoint_id: checkpoint_id.into(),
                label,
                event_index,
            },
            EventMetadata::new(),
            None,
        )
    }

    /// Record an optimizer pass.
    pub fn add_context_optimized(&mut self, result: &OptimizationResult) -> Result<Event> {
        self.append(
            EventData::ContextOptimized {
                original_tokens: result.original_tokens,
                optimized_tokens: result.optimized_tokens,
                messages_removed: result.messages_removed,
                summary_generated: result.summary_generated,
            },
            EventMetadata::new().with_tokens_saved(result.tokens_saved),
            None,
        )
    }

    /// Force the status to `active` without an event and restart the stall
    /// clock. Used by recovery to revive a thread rebuilt from persisted
    /// events.
    pub(crate) fn reactivate(&mut self) {
        self.thread.status = ThreadStatus::Active;
        self.thread.updated_at = self.next_timestamp().max(self.thread.updated_at);
    }
}
