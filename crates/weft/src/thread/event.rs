//! Immutable events: the thread's single source of truth.
//!
//! Each [`Event`] carries a typed [`EventData`] payload. On the wire an event
//! is a flat `{id, timestamp, type, data, metadata}` record; decoding goes
//! through that raw record so that a `type` this build does not know becomes
//! [`EventData::Unknown`] and survives a load/save cycle untouched, while a
//! known `type` with a malformed payload is rejected.

use crate::ToolCall;
use crate::error::ThreadError;
use crate::thread::serializer::tagged_date;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Event type discriminant ────────────────────────────────────────

/// Closed set of event kinds understood by this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    ThreadCreated,
    UserMessage,
    AssistantMessage,
    ToolCallGenerated,
    ToolExecuted,
    StageChanged,
    InfoCollected,
    ErrorOccurred,
    CheckpointCreated,
    ContextOptimized,
    ConversationPaused,
    ConversationResumed,
    ConversationCompleted,
    ConversationCancelled,
    /// A type written by a newer build.
    Unknown,
}

impl EventType {
    /// Every known (non-`Unknown`) event type.
    pub const KNOWN: [EventType; 14] = [
        EventType::ThreadCreated,
        EventType::UserMessage,
        EventType::AssistantMessage,
        EventType::ToolCallGenerated,
        EventType::ToolExecuted,
        EventType::StageChanged,
        EventType::InfoCollected,
        EventType::ErrorOccurred,
        EventType::CheckpointCreated,
        EventType::ContextOptimized,
        EventType::ConversationPaused,
        EventType::ConversationResumed,
        EventType::ConversationCompleted,
        EventType::ConversationCancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ThreadCreated => "thread_created",
            EventType::UserMessage => "user_message",
            EventType::AssistantMessage => "assistant_message",
            EventType::ToolCallGenerated => "tool_call_generated",
            EventType::ToolExecuted => "tool_executed",
            EventType::StageChanged => "stage_changed",
            EventType::InfoCollected => "info_collected",
            EventType::ErrorOccurred => "error_occurred",
            EventType::CheckpointCreated => "checkpoint_created",
            EventType::ContextOptimized => "context_optimized",
            EventType::ConversationPaused => "conversation_paused",
            EventType::ConversationResumed => "conversation_resumed",
            EventType::ConversationCompleted => "conversation_completed",
            EventType::ConversationCancelled => "conversation_cancelled",
            EventType::Unknown => "unknown",
        }
    }

    /// Look up a known event type by its wire name.
    pub fn from_name(name: &str) -> Option<EventType> {
        Self::KNOWN.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Stage ──────────────────────────────────────────────────────────

/// Conversation stage of the task-management agent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Initial,
    CollectingInfo,
    Confirming,
    Executing,
    Completed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Initial => "initial",
            Stage::CollectingInfo => "collecting_info",
            Stage::Confirming => "confirming",
            Stage::Executing => "executing",
            Stage::Completed => "completed",
        };
        f.write_str(s)
    }
}

// ── Payloads ───────────────────────────────────────────────────────

/// Typed payload of an event, one variant per [`EventType`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum EventData {
    ThreadCreated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_thread_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    UserMessage {
        content: String,
    },
    AssistantMessage {
        content: String,
    },
    ToolCallGenerated {
        tool_call: ToolCall,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    ToolExecuted {
        tool_call_id: String,
        tool_name: String,
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StageChanged {
        from: Stage,
        to: Stage,
    },
    InfoCollected {
        category: String,
        value: Value,
    },
    ErrorOccurred {
        message: String,
        recoverable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    CheckpointCreated {
        checkpoint_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        event_index: usize,
    },
    ContextOptimized {
        original_tokens: usize,
        optimized_tokens: usize,
        messages_removed: usize,
        summary_generated: bool,
    },
    ConversationPaused {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ConversationResumed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ConversationCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    ConversationCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Event of a type this build does not know. Kept verbatim.
    #[serde(skip)]
    Unknown { event_type: String, payload: Value },
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            EventData::ThreadCreated { .. } => EventType::ThreadCreated,
            EventData::UserMessage { .. } => EventType::UserMessage,
            EventData::AssistantMessage { .. } => EventType::AssistantMessage,
            EventData::ToolCallGenerated { .. } => EventType::ToolCallGenerated,
            EventData::ToolExecuted { .. } => EventType::ToolExecuted,
            EventData::StageChanged { .. } => EventType::StageChanged,
            EventData::InfoCollected { .. } => EventType::InfoCollected,
            EventData::ErrorOccurred { .. } => EventType::ErrorOccurred,
            EventData::CheckpointCreated { .. } => EventType::CheckpointCreated,
            EventData::ContextOptimized { .. } => EventType::ContextOptimized,
            EventData::ConversationPaused { .. } => EventType::ConversationPaused,
            EventData::ConversationResumed { .. } => EventType::ConversationResumed,
            EventData::ConversationCompleted { .. } => EventType::ConversationCompleted,
            EventData::ConversationCancelled { .. } => EventType::ConversationCancelled,
            EventData::Unknown { .. } => EventType::Unknown,
        }
    }

    /// Wire name of this payload's type (the original name for `Unknown`).
    pub fn type_name(&self) -> &str {
        match self {
            EventData::Unknown { event_type, .. } => event_type,
            other => other.event_type().as_str(),
        }
    }

    /// Split into the wire `(type, data)` pair.
    fn to_wire(&self) -> (String, Value) {
        if let EventData::Unknown {
            event_type,
            payload,
        } = self
        {
            return (event_type.clone(), payload.clone());
        }
        let type_name = self.type_name().to_string();
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                let data = map
                    .remove("data")
                    .unwrap_or_else(|| Value::Object(Default::default()));
                (type_name, data)
            }
            _ => (type_name, Value::Object(Default::default())),
        }
    }
}

// ── Metadata ───────────────────────────────────────────────────────

/// Optional annotations attached to an event.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_saved: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    pub fn with_tokens_saved(mut self, tokens: usize) -> Self {
        self.tokens_saved = Some(tokens);
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

// ── Event ──────────────────────────────────────────────────────────

/// An immutable fact appended to a thread's log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct Event {
    /// Globally unique id.
    pub id: String,
    /// Non-decreasing within a thread.
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
    pub metadata: EventMetadata,
}

impl Event {
    /// Create an event with a fresh id.
    pub fn new(data: EventData, metadata: EventMetadata, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            timestamp,
            data,
            metadata,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.data.event_type()
    }

    /// Whether this event records a failure: an `error_occurred` event or a
    /// tool execution that did not succeed.
    pub fn is_error(&self) -> bool {
        matches!(
            self.data,
            EventData::ErrorOccurred { .. } | EventData::ToolExecuted { success: false, .. }
        )
    }
}

/// Flat wire form of an [`Event`].
#[derive(Serialize, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(with = "tagged_date")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    metadata: EventMetadata,
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        let (event_type, data) = event.data.to_wire();
        RawEvent {
            id: event.id,
            timestamp: event.timestamp,
            event_type,
            data,
            metadata: event.metadata,
        }
    }
}

impl TryFrom<RawEvent> for Event {
    type Error = ThreadError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let data = if EventType::from_name(&raw.event_type).is_some() {
            let payload = match raw.data {
                Value::Null => Value::Object(Default::default()),
                other => other,
            };
            let tagged = serde_json::json!({ "type": raw.event_type, "data": payload });
            serde_json::from_value::<EventData>(tagged).map_err(|e| {
                ThreadError::invalid(format!(
                    "event {}: malformed {} payload: {e}",
                    raw.id, raw.event_type
                ))
            })?
        } else {
            EventData::Unknown {
                event_type: raw.event_type,
                payload: raw.data,
            }
        };
        Ok(Event {
            id: raw.id,
            timestamp: raw.timestamp,
            data,
            metadata: raw.metadata,
        })
    }
}
