//! Token-budgeted context window optimization.
//!
//! A [`ContextOptimizer`] owns one [`ContextWindow`] per live thread. Each
//! incoming event is wrapped as an [`EnhancedMessage`] (priority + token
//! cost) and appended; when the window gets tight the optimizer runs a fixed
//! pipeline:
//!
//! 1. **Summarize** the oldest 40% of the window into the running
//!    [`ConversationSummary`] (skipped below 3 messages).
//! 2. **Evict** messages below the priority threshold.
//! 3. **Cap** the message count, keeping the highest priority.
//! 4. **Fit** the budget by dropping the lowest-priority messages, then the
//!    summary, until `current_tokens <= max_tokens - reserved_tokens`.
//!
//! Steps 2 and 3 follow the priority order alone, so a low-priority newest
//! message can go. Step 4 never removes the newest surviving message. A
//! message that alone
//! exceeds the history budget is rejected with
//! [`OptimizationOutcome::BudgetExceeded`] and the window is left unchanged.

use super::layout::{PromptContext, summary_messages};
use super::priority::{
    HeuristicScorer, Priority, PriorityLevel, PriorityScorer, ScoringHints, compare_priority,
    filter_by_priority, sort_by_priority,
};
use super::summarizer::{ConversationSummary, clip};
use super::tokens::{ContextUsage, TokenEstimator};
use crate::error::{Result, ThreadError};
use crate::thread::{Event, EventData, Thread};
use crate::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Fraction of the window folded into the summary per pass.
const SUMMARIZE_FRACTION: f64 = 0.4;

/// Summarizing fewer messages than this is not worth it.
const MIN_SUMMARIZE_MESSAGES: usize = 3;

/// Length of the one-line preview kept on each message.
const PREVIEW_CHARS: usize = 80;

// ── Configuration ──────────────────────────────────────────────────

/// Optimizer settings.
///
/// ```ignore
/// let config = OptimizerConfig::default()
///     .with_max_tokens(8_000)
///     .with_reserved_tokens(1_000)
///     .with_summary_threshold(10)
///     .with_max_history_messages(8);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizerConfig {
    pub max_tokens: usize,
    /// Withheld for the system prompt and completion; never given to history.
    pub reserved_tokens: usize,
    pub enable_summarization: bool,
    /// Messages appended since the last summary before summarizing.
    pub summary_threshold: usize,
    /// Messages below this level are evicted during a pass.
    pub priority_threshold: PriorityLevel,
    pub max_history_messages: usize,
    /// Fraction of `max_tokens` history may use before summarization is forced.
    pub token_budget_ratio: f64,
    /// Optimize when fewer than this many history tokens remain.
    pub low_budget_headroom: usize,
    /// Number of newest messages that get the recency boost.
    pub recent_window: usize,
    pub estimator: TokenEstimator,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 16_000,
            reserved_tokens: 2_000,
            enable_summarization: true,
            summary_threshold: 20,
            priority_threshold: PriorityLevel::Low,
            max_history_messages: 50,
            token_budget_ratio: 0.8,
            low_budget_headroom: 500,
            recent_window: 5,
            estimator: TokenEstimator::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_reserved_tokens(mut self, tokens: usize) -> Self {
        self.reserved_tokens = tokens;
        self
    }

    pub fn with_summarization(mut self, enabled: bool) -> Self {
        self.enable_summarization = enabled;
        self
    }

    pub fn with_summary_threshold(mut self, messages: usize) -> Self {
        self.summary_threshold = messages;
        self
    }

    pub fn with_priority_threshold(mut self, level: PriorityLevel) -> Self {
        self.priority_threshold = level;
        self
    }

    pub fn with_max_history_messages(mut self, messages: usize) -> Self {
        self.max_history_messages = messages;
        self
    }

    pub fn with_token_budget_ratio(mut self, ratio: f64) -> Self {
        self.token_budget_ratio = ratio;
        self
    }

    pub fn with_low_budget_headroom(mut self, tokens: usize) -> Self {
        self.low_budget_headroom = tokens;
        self
    }

    pub fn with_recent_window(mut self, messages: usize) -> Self {
        self.recent_window = messages;
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Tokens available to history.
    pub fn history_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }
}

// ── Window contents ────────────────────────────────────────────────

/// A role-tagged message with its retention priority and token cost.
/// Recomputed from events on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMessage {
    /// Append order within the window.
    pub sequence: u64,
    /// Source event, if any.
    pub event_id: Option<String>,
    pub message: Message,
    pub priority: Priority,
    pub hints: ScoringHints,
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
    /// One-line preview.
    pub summary: Option<String>,
}

impl EnhancedMessage {
    /// Text used for scoring and summaries.
    pub fn text(&self) -> String {
        message_text(&self.message)
    }
}

fn message_text(message: &Message) -> String {
    if let Some(content) = &message.content {
        return content.clone();
    }
    message
        .tool_calls
        .iter()
        .flatten()
        .map(|c| format!("{} {}", c.name, c.arguments))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Working state of the optimizer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextWindow {
    pub max_tokens: usize,
    pub current_tokens: usize,
    pub messages: Vec<EnhancedMessage>,
    pub summary: Option<ConversationSummary>,
    pub reserved_tokens: usize,
}

impl ContextWindow {
    fn new(config: &OptimizerConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            current_tokens: 0,
            messages: Vec::new(),
            summary: None,
            reserved_tokens: config.reserved_tokens,
        }
    }

    pub fn usage(&self) -> ContextUsage {
        ContextUsage {
            used_tokens: self.current_tokens,
            max_tokens: self.max_tokens,
            reserved_tokens: self.reserved_tokens,
        }
    }

    /// `max_tokens - current_tokens - reserved_tokens`, negative when over.
    pub fn available_tokens(&self) -> i64 {
        self.usage().available()
    }

    pub fn within_budget(&self) -> bool {
        self.available_tokens() >= 0
    }
}

/// Map an event to the message it contributes to the window, with the
/// hints the text alone cannot show. Lifecycle markers contribute nothing.
pub fn message_for_event(event: &Event) -> Option<(Message, ScoringHints)> {
    let hints = ScoringHints::default();
    match &event.data {
        EventData::UserMessage { content } => Some((
            Message::user(content.clone()),
            ScoringHints {
                is_user_authored: true,
                ..hints
            },
        )),
        EventData::AssistantMessage { content } => Some((Message::assistant_text(content.clone()), hints)),
        EventData::ToolCallGenerated { tool_call, .. } => Some((
            Message::assistant_tool_calls(vec![tool_call.clone()]),
            ScoringHints {
                is_decision: true,
                ..hints
            },
        )),
        EventData::ToolExecuted {
            tool_call_id,
            success,
            result,
            error,
            ..
        } => {
            let content = if *success {
                value_text(result)
            } else {
                format!("error: {}", error.as_deref().unwrap_or("tool failed"))
            };
            Some((
                Message::tool_result(tool_call_id.clone(), content),
                ScoringHints {
                    is_tool_result: true,
                    ..hints
                },
            ))
        }
        EventData::InfoCollected { category, value } => Some((
            Message::system(format!("{category}: {}", value_text(value))),
            ScoringHints {
                is_user_preference: true,
                ..hints
            },
        )),
        EventData::StageChanged { from, to } => Some((
            Message::system(format!("stage: {from} -> {to}")),
            ScoringHints {
                is_decision: true,
                ..hints
            },
        )),
        EventData::ErrorOccurred { message, .. } => {
            Some((Message::system(format!("error: {message}")), hints))
        }
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizationOutcome {
    /// The window had room; nothing was removed.
    NotNeeded,
    /// A pass ran.
    Optimized,
    /// The incoming message alone exceeds the history budget. Rejected.
    BudgetExceeded { needed: usize, available: usize },
}

/// What an [`ContextOptimizer::add_message`] call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub original_tokens: usize,
    pub optimized_tokens: usize,
    pub tokens_saved: usize,
    pub savings_percentage: f64,
    pub messages_removed: usize,
    pub messages_kept: usize,
    pub summary_generated: bool,
    pub outcome: OptimizationOutcome,
}

impl OptimizationResult {
    fn unchanged(window: &ContextWindow, outcome: OptimizationOutcome) -> Self {
        Self {
            original_tokens: window.current_tokens,
            optimized_tokens: window.current_tokens,
            tokens_saved: 0,
            savings_percentage: 0.0,
            messages_removed: 0,
            messages_kept: window.messages.len(),
            summary_generated: false,
            outcome,
        }
    }

    pub fn was_optimized(&self) -> bool {
        self.outcome == OptimizationOutcome::Optimized
    }

    /// Turn a rejected message into [`ThreadError::BudgetExceeded`].
    pub fn check(&self) -> Result<()> {
        match self.outcome {
            OptimizationOutcome::BudgetExceeded { needed, available } => {
                Err(ThreadError::BudgetExceeded { needed, available })
            }
            _ => Ok(()),
        }
    }
}

/// Cumulative counters for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerStats {
    pub messages_added: usize,
    pub passes: usize,
    pub messages_removed: usize,
    pub tokens_saved: usize,
    pub summaries_generated: usize,
    pub messages_rejected: usize,
}

// ── Optimizer ──────────────────────────────────────────────────────

pub struct ContextOptimizer {
    config: OptimizerConfig,
    window: ContextWindow,
    scorer: Box<dyn PriorityScorer>,
    next_sequence: u64,
    /// Messages appended since the last summarization.
    unsummarized: usize,
    stats: OptimizerStats,
}

impl ContextOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let window = ContextWindow::new(&config);
        Self {
            config,
            window,
            scorer: Box::new(HeuristicScorer),
            next_sequence: 0,
            unsummarized: 0,
            stats: OptimizerStats::default(),
        }
    }

    /// Replace the default [`HeuristicScorer`].
    pub fn with_scorer(mut self, scorer: impl PriorityScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    /// Rebuild a window by replaying a thread's events.
    pub fn from_thread(thread: &Thread, config: OptimizerConfig) -> Self {
        let mut optimizer = Self::new(config);
        optimizer.replay(thread);
        optimizer
    }

    /// Replay events into this (fresh) optimizer.
    pub fn replay(&mut self, thread: &Thread) {
        for event in &thread.events {
            let result = self.add_event(event);
            if let OptimizationOutcome::BudgetExceeded { needed, available } = result.outcome {
                warn!(
                    "[{}] skipping event {} during window rebuild: needs {needed} tokens, {available} available",
                    thread.thread_id, event.id
                );
            }
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    pub fn stats(&self) -> OptimizerStats {
        self.stats
    }

    pub fn usage(&self) -> ContextUsage {
        self.window.usage()
    }

    /// Visible window plus summary, ready for the LLM collaborator.
    pub fn prompt_context(&self) -> PromptContext {
        PromptContext::new(
            self.window.summary.clone(),
            self.window.messages.iter().map(|m| m.message.clone()).collect(),
            self.window.usage(),
        )
    }

    /// Add the message an event contributes, if any.
    pub fn add_event(&mut self, event: &Event) -> OptimizationResult {
        match message_for_event(event) {
            Some((message, hints)) => {
                self.add_message(message, hints, event.timestamp, Some(event.id.clone()))
            }
            None => OptimizationResult::unchanged(&self.window, OptimizationOutcome::NotNeeded),
        }
    }

    /// Wrap, append, and optimize if needed.
    pub fn add_message(
        &mut self,
        message: Message,
        hints: ScoringHints,
        timestamp: DateTime<Utc>,
        event_id: Option<String>,
    ) -> OptimizationResult {
        let estimator = self.config.estimator;
        let token_count = estimator.estimate_message(&message);
        let budget = self.config.history_budget();
        if token_count > budget {
            self.stats.messages_rejected += 1;
            warn!("message needs {token_count} tokens but the history budget is {budget}; rejected");
            return OptimizationResult::unchanged(
                &self.window,
                OptimizationOutcome::BudgetExceeded {
                    needed: token_count,
                    available: budget,
                },
            );
        }

        let text = message_text(&message);
        let hints = ScoringHints {
            is_recent: self.config.recent_window > 0,
            ..hints
        };
        let enhanced = EnhancedMessage {
            sequence: self.next_sequence,
            event_id,
            priority: self.scorer.score(&text, &hints),
            summary: Some(clip(text.lines().next().unwrap_or(""), PREVIEW_CHARS)),
            message,
            hints,
            token_count,
            timestamp,
        };
        self.next_sequence += 1;
        self.unsummarized += 1;
        self.stats.messages_added += 1;
        self.window.messages.push(enhanced);
        self.rescore_recency();
        self.recompute_tokens();

        if !self.needs_optimization() {
            return OptimizationResult::unchanged(&self.window, OptimizationOutcome::NotNeeded);
        }
        self.optimize()
    }

    fn summarization_forced(&self) -> bool {
        self.window.current_tokens as f64
            > self.config.token_budget_ratio * self.config.max_tokens as f64
    }

    fn wants_summary(&self) -> bool {
        self.config.enable_summarization
            && (self.unsummarized >= self.config.summary_threshold || self.summarization_forced())
    }

    fn needs_optimization(&self) -> bool {
        self.window.available_tokens() < self.config.low_budget_headroom as i64
            || self.window.messages.len() > self.config.max_history_messages
            || self.wants_summary()
    }

    fn optimize(&mut self) -> OptimizationResult {
        let original_tokens = self.window.current_tokens;
        let original_count = self.window.messages.len();
        let mut summary_generated = false;

        // (a) summarize the oldest slice
        if self.wants_summary() {
            let count = self.window.messages.len();
            let n = (count as f64 * SUMMARIZE_FRACTION).floor() as usize;
            if n >= MIN_SUMMARIZE_MESSAGES {
                let removed: Vec<EnhancedMessage> = self.window.messages.drain(..n).collect();
                if let Some(fresh) = ConversationSummary::from_messages(&removed) {
                    match self.window.summary.as_mut() {
                        Some(existing) => existing.merge(fresh),
                        None => self.window.summary = Some(fresh),
                    }
                    summary_generated = true;
                    self.unsummarized = 0;
                }
            } else {
                debug!("summarization skipped: only {n} message(s) eligible");
            }
        }

        // (b) evict below the priority threshold
        let threshold = self.config.priority_threshold;
        self.window.messages = filter_by_priority(&self.window.messages, threshold);

        // (c) cap the count, keeping the highest priority
        let cap = self.config.max_history_messages.max(1);
        if self.window.messages.len() > cap {
            let mut ranked = self.window.messages.clone();
            sort_by_priority(&mut ranked);
            ranked.truncate(cap);
            ranked.sort_by_key(|m| m.sequence);
            self.window.messages = ranked;
        }
        self.recompute_tokens();

        // (d) fit the budget; the newest surviving message is never evicted
        let newest = self.window.messages.last().map(|m| m.sequence);
        let budget = self.config.history_budget();
        while self.window.current_tokens > budget && self.window.messages.len() > 1 {
            let victim = self
                .window
                .messages
                .iter()
                .enumerate()
                .filter(|(_, m)| Some(m.sequence) != newest)
                .max_by(|(_, a), (_, b)| compare_priority(a, b))
                .map(|(i, _)| i);
            match victim {
                Some(i) => {
                    self.window.messages.remove(i);
                    self.recompute_tokens();
                }
                None => break,
            }
        }
        if self.window.current_tokens > budget && self.window.summary.is_some() {
            warn!("dropping conversation summary to fit the history budget");
            self.window.summary = None;
            self.recompute_tokens();
        }

        let optimized_tokens = self.window.current_tokens;
        let kept = self.window.messages.len();
        let tokens_saved = original_tokens.saturating_sub(optimized_tokens);
        let result = OptimizationResult {
            original_tokens,
            optimized_tokens,
            tokens_saved,
            savings_percentage: if original_tokens > 0 {
                tokens_saved as f64 / original_tokens as f64 * 100.0
            } else {
                0.0
            },
            messages_removed: original_count.saturating_sub(kept),
            messages_kept: kept,
            summary_generated,
            outcome: OptimizationOutcome::Optimized,
        };

        self.stats.passes += 1;
        self.stats.messages_removed += result.messages_removed;
        self.stats.tokens_saved += tokens_saved;
        if summary_generated {
            self.stats.summaries_generated += 1;
        }
        if result.messages_removed > 0 {
            info!(
                "context optimized: {} -> {} tokens, {} removed, {} kept{}",
                original_tokens,
                optimized_tokens,
                result.messages_removed,
                kept,
                if summary_generated { ", summary updated" } else { "" }
            );
        }
        debug!("{}", self.window.usage().to_log_string());
        result
    }

    /// Only the newest `recent_window` messages carry the recency boost.
    fn rescore_recency(&mut self) {
        let len = self.window.messages.len();
        let recent_from = len.saturating_sub(self.config.recent_window);
        for (i, m) in self.window.messages.iter_mut().enumerate() {
            let recent = i >= recent_from;
            if m.hints.is_recent != recent {
                m.hints.is_recent = recent;
                m.priority = self.scorer.score(&message_text(&m.message), &m.hints);
            }
        }
    }

    fn recompute_tokens(&mut self) {
        let estimator = self.config.estimator;
        let messages: usize = self.window.messages.iter().map(|m| m.token_count).sum();
        let summary = self
            .window
            .summary
            .as_ref()
            .map_or(0, |s| estimator.estimate_batch(&summary_messages(s)));
        self.window.current_tokens = messages + summary;
    }
}
