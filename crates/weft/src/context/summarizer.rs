//! Extractive conversation summaries for context compaction.
//!
//! A [`ConversationSummary`] stands in for a contiguous prefix of the window
//! that was removed. Summaries are built from the removed messages themselves
//! (no model call) and merge by concatenation: an existing summary is never
//! re-summarized. Every list and the text are capped, so a summary stays the
//! same size no matter how many passes fold into it.

use super::optimizer::EnhancedMessage;
use super::priority::PriorityLevel;
use crate::MessageRole;
use crate::thread::serializer::tagged_date;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Most recent key points kept after a merge.
pub const MAX_KEY_POINTS: usize = 8;
/// Most recent decisions kept after a merge.
pub const MAX_DECISIONS: usize = 8;
/// Preference entries kept (existing keys are always updated).
pub const MAX_PREFERENCES: usize = 16;
/// Cap on the summary text, in characters.
pub const MAX_SUMMARY_CHARS: usize = 480;
/// Cap on each extracted point, in characters.
pub const MAX_POINT_CHARS: usize = 120;

/// Lossy compaction of removed messages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub summary: String,
    pub key_points: Vec<String>,
    pub important_decisions: Vec<String>,
    pub user_preferences: BTreeMap<String, String>,
    pub original_message_count: usize,
    pub summarized_tokens: usize,
    #[serde(with = "tagged_date")]
    pub last_summary_timestamp: DateTime<Utc>,
}

impl ConversationSummary {
    /// Summarize a span of removed messages. Returns `None` for an empty span.
    pub fn from_messages(span: &[EnhancedMessage]) -> Option<Self> {
        let last = span.iter().map(|m| m.timestamp).max()?;

        let mut user = 0;
        let mut assistant = 0;
        let mut tool = 0;
        let mut key_points = Vec::new();
        let mut important_decisions = Vec::new();
        let mut user_preferences = BTreeMap::new();
        let mut topics = Vec::new();

        for m in span {
            match m.message.role {
                MessageRole::User => user += 1,
                MessageRole::Assistant => assistant += 1,
                MessageRole::Tool => tool += 1,
                MessageRole::System => {}
            }
            let owned = m.text();
            let text = owned.as_str();
            let point = format!("{}: {}", m.message.role, clip(text, MAX_POINT_CHARS));

            if m.hints.is_user_preference
                && let Some((key, value)) = text.split_once(": ")
            {
                user_preferences.insert(key.trim().to_string(), clip(value.trim(), MAX_POINT_CHARS));
            }
            if m.hints.is_decision {
                important_decisions.push(point);
            } else if m.priority.level >= PriorityLevel::High {
                key_points.push(point);
            }
            if m.message.role == MessageRole::User && topics.len() < 3 && !text.is_empty() {
                topics.push(clip(first_line(text), 60));
            }
        }

        let mut summary = format!(
            "{} earlier message(s): {user} user, {assistant} assistant, {tool} tool.",
            span.len()
        );
        if !topics.is_empty() {
            summary.push_str(" User asked about: ");
            summary.push_str(&topics.join("; "));
            summary.push('.');
        }

        let mut out = Self {
            summary,
            key_points,
            important_decisions,
            user_preferences,
            original_message_count: span.len(),
            summarized_tokens: span.iter().map(|m| m.token_count).sum(),
            last_summary_timestamp: last,
        };
        out.enforce_caps();
        Some(out)
    }

    /// Fold a newer summary into this one by concatenation.
    pub fn merge(&mut self, newer: ConversationSummary) {
        self.summary = format!("{} {}", self.summary, newer.summary);
        self.key_points.extend(newer.key_points);
        self.important_decisions.extend(newer.important_decisions);
        for (key, value) in newer.user_preferences {
            if self.user_preferences.len() < MAX_PREFERENCES || self.user_preferences.contains_key(&key) {
                self.user_preferences.insert(key, value);
            }
        }
        self.original_message_count += newer.original_message_count;
        self.summarized_tokens += newer.summarized_tokens;
        self.last_summary_timestamp = self.last_summary_timestamp.max(newer.last_summary_timestamp);
        self.enforce_caps();
    }

    fn enforce_caps(&mut self) {
        keep_last(&mut self.key_points, MAX_KEY_POINTS);
        keep_last(&mut self.important_decisions, MAX_DECISIONS);
        while self.user_preferences.len() > MAX_PREFERENCES {
            self.user_preferences.pop_first();
        }
        self.summary = clip_front(&self.summary, MAX_SUMMARY_CHARS);
    }

    /// Plain-text rendering used in prompts and for token estimation.
    pub fn render(&self) -> String {
        let mut out = self.summary.clone();
        if !self.key_points.is_empty() {
            out.push_str("\nKey points:");
            for p in &self.key_points {
                out.push_str("\n- ");
                out.push_str(p);
            }
        }
        if !self.important_decisions.is_empty() {
            out.push_str("\nDecisions:");
            for d in &self.important_decisions {
                out.push_str("\n- ");
                out.push_str(d);
            }
        }
        if !self.user_preferences.is_empty() {
            out.push_str("\nPreferences:");
            for (k, v) in &self.user_preferences {
                out.push_str(&format!("\n- {k}: {v}"));
            }
        }
        out
    }
}

fn keep_last(items: &mut Vec<String>, max: usize) {
    if items.len() > max {
        items.drain(..items.len() - max);
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Keep the first `max` characters, marking the cut.
pub(crate) fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Keep the last `max` characters, marking the cut. Older text goes first.
fn clip_front(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max.saturating_sub(3)).collect();
    format!("...{tail}")
}
