//! Failure diagnosis and strategy selection.
//!
//! [`analyze`] is pure: it reads a thread and a clock and produces a
//! [`RecoveryContext`]. The suggested strategy comes from
//! [`DECISION_TABLE`], checked top to bottom; the first matching rule wins
//! and [`RecoveryStrategy::ResumeFromLastEvent`] is the fallback.

use crate::error::ThreadError;
use crate::thread::{EventType, Thread, ThreadStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default time an `active` thread may go without an update before it is
/// considered stalled.
pub const DEFAULT_STALL_THRESHOLD_SECS: u64 = 5 * 60;

/// Default number of recovery attempts per thread.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Recovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecoveryConfig {
    pub stall_threshold_secs: u64,
    pub max_retries: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: DEFAULT_STALL_THRESHOLD_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RecoveryConfig {
    pub fn with_stall_threshold_secs(mut self, secs: u64) -> Self {
        self.stall_threshold_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::seconds(i64::try_from(self.stall_threshold_secs).unwrap_or(i64::MAX / 1000))
    }
}

// ── Strategy ───────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Discard all events and start a brand-new thread.
    RestartFromBeginning,
    /// Rebuild from the full log and move to `active`.
    ResumeFromLastEvent,
    /// Truncate to the latest checkpoint and resume.
    RollbackToCheckpoint,
    /// Fork the full log and resume the fork; the original is untouched.
    ForkAndRetry,
    /// No automatic mutation.
    ManualIntervention,
}

impl RecoveryStrategy {
    pub const ALL: [RecoveryStrategy; 5] = [
        RecoveryStrategy::RestartFromBeginning,
        RecoveryStrategy::ResumeFromLastEvent,
        RecoveryStrategy::RollbackToCheckpoint,
        RecoveryStrategy::ForkAndRetry,
        RecoveryStrategy::ManualIntervention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::RestartFromBeginning => "restart_from_beginning",
            RecoveryStrategy::ResumeFromLastEvent => "resume_from_last_event",
            RecoveryStrategy::RollbackToCheckpoint => "rollback_to_checkpoint",
            RecoveryStrategy::ForkAndRetry => "fork_and_retry",
            RecoveryStrategy::ManualIntervention => "manual_intervention",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryStrategy {
    type Err = ThreadError;

    /// Accepts the snake_case name or its hyphenated form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| ThreadError::invalid(format!("unknown recovery strategy {s:?}")))
    }
}

// ── Context ────────────────────────────────────────────────────────

/// Diagnosis of a persisted thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryContext {
    pub thread_id: String,
    pub status: ThreadStatus,
    pub event_count: usize,
    pub has_errors: bool,
    pub is_stalled: bool,
    /// Position of the most recent failure event.
    pub last_error_index: Option<usize>,
    pub last_error: Option<String>,
    /// Latest non-error event after `thread_created` (and before the last
    /// failure, when there is one).
    pub last_successful_event_index: Option<usize>,
    /// `eventIndex` of the checkpoint a rollback would use.
    pub checkpoint_event_index: Option<usize>,
    pub checkpoint_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retries_exhausted: bool,
    pub suggested_strategy: RecoveryStrategy,
    /// Which decision rule produced the suggestion.
    pub reason: String,
}

/// One row of the decision table.
pub struct DecisionRule {
    pub name: &'static str,
    pub applies: fn(&RecoveryContext) -> bool,
    pub strategy: RecoveryStrategy,
}

fn retries_exhausted(ctx: &RecoveryContext) -> bool {
    ctx.retries_exhausted
}

fn errors_after_success(ctx: &RecoveryContext) -> bool {
    ctx.has_errors && ctx.last_successful_event_index.is_some()
}

fn stalled_without_errors(ctx: &RecoveryContext) -> bool {
    !ctx.has_errors && ctx.is_stalled
}

/// Condition -> strategy, first match wins.
pub const DECISION_TABLE: &[DecisionRule] = &[
    DecisionRule {
        name: "retry budget exhausted",
        applies: retries_exhausted,
        strategy: RecoveryStrategy::ManualIntervention,
    },
    DecisionRule {
        name: "errors after a successful event",
        applies: errors_after_success,
        strategy: RecoveryStrategy::RollbackToCheckpoint,
    },
    DecisionRule {
        name: "stalled without errors",
        applies: stalled_without_errors,
        strategy: RecoveryStrategy::ForkAndRetry,
    },
];

/// Strategy used when no rule matches.
pub const FALLBACK_STRATEGY: RecoveryStrategy = RecoveryStrategy::ResumeFromLastEvent;

/// Pick a strategy for `ctx` from [`DECISION_TABLE`].
pub fn suggest(ctx: &RecoveryContext) -> (RecoveryStrategy, &'static str) {
    DECISION_TABLE
        .iter()
        .find(|rule| (rule.applies)(ctx))
        .map_or((FALLBACK_STRATEGY, "no failure signals"), |rule| {
            (rule.strategy, rule.name)
        })
}

/// Position of the most recent failure event.
pub fn last_error_index(thread: &Thread) -> Option<usize> {
    thread.events.iter().rposition(|e| e.is_error())
}

/// The checkpoint a rollback should use: the latest one before the last
/// failure, or the latest overall when nothing failed.
pub fn rollback_checkpoint(thread: &Thread) -> Option<crate::thread::CheckpointRef> {
    let limit = last_error_index(thread).unwrap_or(thread.events.len());
    thread
        .checkpoints()
        .into_iter()
        .rev()
        .find(|cp| cp.position < limit)
}

/// Diagnose `thread` as of `now`.
///
/// `attempts` is the number of recovery attempts already made by the
/// caller; the effective retry count is the larger of that and the highest
/// `retryCount` recorded in event metadata.
pub fn analyze(thread: &Thread, now: DateTime<Utc>, config: &RecoveryConfig, attempts: u32) -> RecoveryContext {
    let last_error_index = last_error_index(thread);
    let limit = last_error_index.unwrap_or(thread.events.len());
    let last_successful_event_index = thread.events[..limit]
        .iter()
        .rposition(|e| !e.is_error() && e.event_type() != EventType::ThreadCreated);

    let last_error = last_error_index.and_then(|i| match &thread.events[i].data {
        crate::thread::EventData::ErrorOccurred { message, .. } => Some(message.clone()),
        crate::thread::EventData::ToolExecuted {
            tool_name, error, ..
        } => Some(format!(
            "tool {tool_name} failed: {}",
            error.as_deref().unwrap_or("no error message")
        )),
        _ => None,
    });

    let checkpoint = rollback_checkpoint(thread);
    let logged_retries = thread
        .events
        .iter()
        .filter_map(|e| e.metadata.retry_count)
        .max()
        .unwrap_or(0);
    let retry_count = attempts.max(logged_retries);

    let is_stalled =
        thread.status == ThreadStatus::Active && now - thread.updated_at > config.stall_threshold();

    let mut ctx = RecoveryContext {
        thread_id: thread.thread_id.clone(),
        status: thread.status,
        event_count: thread.events.len(),
        has_errors: last_error_index.is_some(),
        is_stalled,
        last_error_index,
        last_error,
        last_successful_event_index,
        checkpoint_event_index: checkpoint.as_ref().map(|cp| cp.event_index),
        checkpoint_id: checkpoint.map(|cp| cp.checkpoint_id),
        retry_count,
        max_retries: config.max_retries,
        retries_exhausted: retry_count >= config.max_retries,
        suggested_strategy: FALLBACK_STRATEGY,
        reason: String::new(),
    };
    let (strategy, reason) = suggest(&ctx);
    ctx.suggested_strategy = strategy;
    ctx.reason = reason.to_string();
    ctx
}
