//! Derived state: a pure fold over a thread's events.
//!
//! Nothing here is stored. [`project`] recomputes everything from scratch and
//! two identical event lists always produce identical state; replaying the
//! same events one at a time through [`DerivedState::apply`] reaches the
//! same result.

use crate::{Message, ToolCall};
use crate::thread::event::{Event, EventData, Stage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Tool names that ask the user something and count as outstanding questions.
pub const QUESTION_TOOLS: [&str; 3] = ["ask_question", "ask_clarification", "request_clarification"];

/// Whether `tool_name` is one of the [`QUESTION_TOOLS`].
pub fn is_question_tool(tool_name: &str) -> bool {
    QUESTION_TOOLS.contains(&tool_name)
}

/// The most recent `error_occurred` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub message: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub event_index: usize,
    pub timestamp: DateTime<Utc>,
}

/// State computed from the event log.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedState {
    pub stage: Stage,
    /// Last write per category wins.
    pub collected_info: BTreeMap<String, Value>,
    pub question_count: usize,
    /// The latest question tool call, until a user message answers it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<ToolCall>,
    /// User and assistant turns in append order.
    pub message_history: Vec<Message>,
    pub last_error: Option<LastError>,
}

impl DerivedState {
    /// Fold one event (at position `index` in the log) into the state.
    pub fn apply(&mut self, index: usize, event: &Event) {
        match &event.data {
            EventData::StageChanged { to, .. } => self.stage = *to,
            EventData::InfoCollected { category, value } => {
                self.collected_info.insert(category.clone(), value.clone());
            }
            EventData::ToolCallGenerated { tool_call, .. } => {
                if is_question_tool(&tool_call.name) {
                    self.question_count += 1;
                    self.pending_question = Some(tool_call.clone());
                }
            }
            EventData::UserMessage { content } => {
                self.pending_question = None;
                self.message_history.push(Message::user(content.clone()));
            }
            EventData::AssistantMessage { content } => {
                self.message_history
                    .push(Message::assistant_text(content.clone()));
            }
            EventData::ErrorOccurred {
                message,
                recoverable,
                code,
            } => {
                self.last_error = Some(LastError {
                    message: message.clone(),
                    recoverable: *recoverable,
                    code: code.clone(),
                    event_index: index,
                    timestamp: event.timestamp,
                });
            }
            _ => {}
        }
    }
}

/// Recompute derived state from scratch.
pub fn project(events: &[Event]) -> DerivedState {
    events
        .iter()
        .enumerate()
        .fold(DerivedState::default(), |mut state, (i, event)| {
            state.apply(i, event);
            state
        })
}
