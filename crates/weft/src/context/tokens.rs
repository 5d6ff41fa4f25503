//! Token estimation for budgeting.
//!
//! The estimate is a conservative character heuristic:
//! `ceil(chars / chars_per_token) + fixed_buffer`, plus a per-message
//! overhead for role framing. The constants are tunable; callers should rely
//! on the budget guarantees the optimizer gives, not on exact counts.

use crate::Message;
use serde::{Deserialize, Serialize};

/// Default characters per token.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Tokens added to every text estimate to absorb tokenizer variance.
pub const DEFAULT_TOKEN_BUFFER: usize = 4;

/// Structural overhead per message (role markers, separators).
pub const DEFAULT_MESSAGE_OVERHEAD: usize = 4;

/// Appended by [`TokenEstimator::truncate_to_fit`] when text is cut.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Pure, deterministic token estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenEstimator {
    pub chars_per_token: usize,
    pub fixed_buffer: usize,
    pub message_overhead: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            fixed_buffer: DEFAULT_TOKEN_BUFFER,
            message_overhead: DEFAULT_MESSAGE_OVERHEAD,
        }
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chars_per_token(mut self, chars: usize) -> Self {
        self.chars_per_token = chars.max(1);
        self
    }

    pub fn with_fixed_buffer(mut self, tokens: usize) -> Self {
        self.fixed_buffer = tokens;
        self
    }

    pub fn with_message_overhead(mut self, tokens: usize) -> Self {
        self.message_overhead = tokens;
        self
    }

    fn cpt(&self) -> usize {
        self.chars_per_token.max(1)
    }

    /// Estimate tokens for raw text.
    pub fn estimate_text(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.cpt()) + self.fixed_buffer
    }

    /// Estimate tokens for one message, including role framing.
    pub fn estimate_message(&self, message: &Message) -> usize {
        let mut tokens = self.message_overhead;
        tokens += self.estimate_text(message.content.as_deref().unwrap_or(""));
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                tokens += self.estimate_text(&call.name);
                tokens += self.estimate_text(&call.arguments.to_string());
            }
        }
        tokens
    }

    pub fn estimate_batch(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Cut `text` so that [`estimate_text`](Self::estimate_text) of the result
    /// is at most `max_tokens`. Text that already fits is returned unchanged.
    pub fn truncate_to_fit(&self, text: &str, max_tokens: usize) -> String {
        if self.estimate_text(text) <= max_tokens {
            return text.to_string();
        }
        let budget_chars = max_tokens.saturating_sub(self.fixed_buffer) * self.cpt();
        let marker_chars = TRUNCATION_MARKER.chars().count();
        if budget_chars <= marker_chars {
            return text.chars().take(budget_chars).collect();
        }
        let mut out: String = text.chars().take(budget_chars - marker_chars).collect();
        out.push_str(TRUNCATION_MARKER);
        out
    }
}

/// Snapshot of a context window's token consumption.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsage {
    pub used_tokens: usize,
    pub max_tokens: usize,
    pub reserved_tokens: usize,
}

impl ContextUsage {
    /// Tokens that may be given to history.
    pub fn history_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }

    /// Remaining history budget (negative when over).
    pub fn available(&self) -> i64 {
        self.history_budget() as i64 - self.used_tokens as i64
    }

    /// Fraction of the history budget in use.
    pub fn usage_pct(&self) -> f64 {
        let budget = self.history_budget();
        if budget == 0 {
            1.0
        } else {
            self.used_tokens as f64 / budget as f64
        }
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {} history budget, {} reserved)",
            self.used_tokens,
            self.usage_pct() * 100.0,
            self.history_budget(),
            self.reserved_tokens,
        )
    }
}
