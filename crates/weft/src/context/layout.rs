//! Prompt context assembly.
//!
//! The LLM collaborator sees two zones:
//! 1. **Compressed history**: the running [`ConversationSummary`], wrapped in
//!    `<context_summary>` tags and acknowledged by the assistant.
//! 2. **Visible window**: the optimizer's surviving messages, oldest first.
//!
//! Derived thread state (stage, collected info) rides along so the caller
//! can build its own system prompt around it.

use super::summarizer::ConversationSummary;
use super::tokens::{ContextUsage, TokenEstimator};
use crate::Message;
use crate::thread::DerivedState;
use serde::Serialize;

/// Assistant acknowledgement that follows the summary message.
pub const SUMMARY_ACK: &str =
    "I've reviewed the context summary and will continue from where I left off.";

/// The message pair a summary occupies in the prompt.
pub fn summary_messages(summary: &ConversationSummary) -> Vec<Message> {
    vec![
        Message::user(format!(
            "<context_summary>\n{}\n</context_summary>",
            summary.render()
        )),
        Message::assistant_text(SUMMARY_ACK),
    ]
}

/// Everything the LLM collaborator needs for its next call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub summary: Option<ConversationSummary>,
    /// Visible window, chronological.
    pub messages: Vec<Message>,
    pub usage: ContextUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DerivedState>,
}

impl PromptContext {
    pub fn new(summary: Option<ConversationSummary>, messages: Vec<Message>, usage: ContextUsage) -> Self {
        Self {
            summary,
            messages,
            usage,
            state: None,
        }
    }

    /// Attach the thread's derived state.
    pub fn with_state(mut self, state: DerivedState) -> Self {
        self.state = Some(state);
        self
    }

    /// Flatten into the message list sent to the model.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut out = self
            .summary
            .as_ref()
            .map(summary_messages)
            .unwrap_or_default();
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Per-zone token estimate.
    pub fn breakdown(&self, estimator: &TokenEstimator) -> ContextBreakdown {
        let summary_tokens = self
            .summary
            .as_ref()
            .map_or(0, |s| estimator.estimate_batch(&summary_messages(s)));
        let window_tokens = estimator.estimate_batch(&self.messages);
        ContextBreakdown {
            summary_tokens,
            window_tokens,
            total_tokens: summary_tokens + window_tokens,
        }
    }
}

/// Per-zone breakdown of estimated prompt tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBreakdown {
    pub summary_tokens: usize,
    pub window_tokens: usize,
    pub total_tokens: usize,
}
