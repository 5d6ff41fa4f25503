//! Message prioritization for retention decisions.
//!
//! Scoring sits behind the [`PriorityScorer`] trait so the optimizer can run
//! with a deterministic stub in tests. [`HeuristicScorer`] is the default:
//!
//! | Signal | Boost |
//! |--------|-------|
//! | base | 50 |
//! | tool result | +25 |
//! | decision | +20 |
//! | user preference | +15 |
//! | recent | +10 |
//! | user-authored | +5 |
//! | domain keyword (create/confirm/error/important/decision/preference) | +30 |
//! | length in `[20, 500]` chars | +5 |
//! | contains `?` | +3 |
//! | structured keyword (title, due date, priority, ...) | +5 |
//!
//! Scores are clamped to `[0, 100]` and bucketed at 80 / 65 / 40.

use super::optimizer::EnhancedMessage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;

pub const BASE_SCORE: u32 = 50;
pub const TOOL_RESULT_BOOST: u32 = 25;
pub const DECISION_BOOST: u32 = 20;
pub const PREFERENCE_BOOST: u32 = 15;
pub const RECENCY_BOOST: u32 = 10;
pub const USER_BOOST: u32 = 5;
pub const KEYWORD_BOOST: u32 = 30;
pub const LENGTH_BOOST: u32 = 5;
pub const QUESTION_BOOST: u32 = 3;
pub const STRUCTURED_BOOST: u32 = 5;

pub const CRITICAL_THRESHOLD: u32 = 80;
pub const HIGH_THRESHOLD: u32 = 65;
pub const MEDIUM_THRESHOLD: u32 = 40;

const QUALITY_MIN_CHARS: usize = 20;
const QUALITY_MAX_CHARS: usize = 500;

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(creat\w*|confirm\w*|error\w*|important|decision\w*|decide\w*|preferen\w*|prefer\w*)\b")
        .expect("valid keyword regex")
});

static STRUCTURED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(title|due[ _]?date|deadline|priority|status|assignee|project|tags?)\b")
        .expect("valid structured-keyword regex")
});

/// Retention level. Ordered `Low < Medium < High < Critical`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    /// Bucket a clamped score.
    pub fn from_score(score: u32) -> Self {
        if score >= CRITICAL_THRESHOLD {
            PriorityLevel::Critical
        } else if score >= HIGH_THRESHOLD {
            PriorityLevel::High
        } else if score >= MEDIUM_THRESHOLD {
            PriorityLevel::Medium
        } else {
            PriorityLevel::Low
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PriorityLevel::Low => "low",
            PriorityLevel::Medium => "medium",
            PriorityLevel::High => "high",
            PriorityLevel::Critical => "critical",
        })
    }
}

/// Result of scoring one message.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Priority {
    pub level: PriorityLevel,
    /// In `[0, 100]`.
    pub score: u32,
    pub reason: String,
}

impl Priority {
    /// Build from a raw score, clamping and bucketing it.
    pub fn from_score(score: u32, reason: impl Into<String>) -> Self {
        let score = score.min(100);
        Self {
            level: PriorityLevel::from_score(score),
            score,
            reason: reason.into(),
        }
    }
}

/// Contextual facts about a message that the text alone does not show.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoringHints {
    pub is_tool_result: bool,
    pub is_decision: bool,
    pub is_user_preference: bool,
    pub is_recent: bool,
    pub is_user_authored: bool,
}

/// Pluggable scoring strategy.
pub trait PriorityScorer: Send + Sync {
    fn score(&self, content: &str, hints: &ScoringHints) -> Priority;
}

/// Default regex-and-hints scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl PriorityScorer for HeuristicScorer {
    fn score(&self, content: &str, hints: &ScoringHints) -> Priority {
        let mut score = BASE_SCORE;
        let mut reasons = vec![format!("base {BASE_SCORE}")];
        let mut boost = |applies: bool, amount: u32, label: &str| {
            if applies {
                score += amount;
                reasons.push(format!("{label} +{amount}"));
            }
        };

        boost(hints.is_tool_result, TOOL_RESULT_BOOST, "tool result");
        boost(hints.is_decision, DECISION_BOOST, "decision");
        boost(hints.is_user_preference, PREFERENCE_BOOST, "preference");
        boost(hints.is_recent, RECENCY_BOOST, "recent");
        boost(hints.is_user_authored, USER_BOOST, "user");
        boost(KEYWORD_RE.is_match(content), KEYWORD_BOOST, "keyword");

        let chars = content.chars().count();
        boost(
            (QUALITY_MIN_CHARS..=QUALITY_MAX_CHARS).contains(&chars),
            LENGTH_BOOST,
            "length",
        );
        boost(content.contains('?'), QUESTION_BOOST, "question");
        boost(STRUCTURED_RE.is_match(content), STRUCTURED_BOOST, "structured");

        Priority::from_score(score, reasons.join(", "))
    }
}

/// Total order used for retention: level, then score, then recency
/// (newer first), then append sequence (newer first). Highest priority
/// sorts first.
pub fn compare_priority(a: &EnhancedMessage, b: &EnhancedMessage) -> Ordering {
    b.priority
        .level
        .cmp(&a.priority.level)
        .then_with(|| b.priority.score.cmp(&a.priority.score))
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| b.sequence.cmp(&a.sequence))
}

/// Sort in place, highest priority first.
pub fn sort_by_priority(messages: &mut [EnhancedMessage]) {
    messages.sort_by(compare_priority);
}

/// Keep messages at or above `min_level`, preserving order.
pub fn filter_by_priority(messages: &[EnhancedMessage], min_level: PriorityLevel) -> Vec<EnhancedMessage> {
    messages
        .iter()
        .filter(|m| m.priority.level >= min_level)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use chrono::{Duration, Utc};

    fn msg(sequence: u64, score: u32, age_secs: i64) -> EnhancedMessage {
        EnhancedMessage {
            sequence,
            event_id: None,
            message: Message::user(format!("m{sequence}")),
            priority: Priority::from_score(score, "test"),
            hints: ScoringHints::default(),
            token_count: 10,
            timestamp: Utc::now() - Duration::seconds(age_secs),
            summary: None,
        }
    }

    #[test]
    fn plain_short_text_scores_base() {
        let p = HeuristicScorer.score("ok", &ScoringHints::default());
        assert_eq!(p.score, 50);
        assert_eq!(p.level, PriorityLevel::Medium);
        assert_eq!(p.reason, "base 50");
    }

    #[test]
    fn boosts_accumulate_and_clamp() {
        let hints = ScoringHints {
            is_tool_result: true,
            is_decision: true,
            ..Default::default()
        };
        let p = HeuristicScorer.score("Created task with priority high. Confirm?", &hints);
        assert_eq!(p.score, 100);
        assert_eq!(p.level, PriorityLevel::Critical);
    }

    #[test]
    fn keyword_and_quality_boosts() {
        let p = HeuristicScorer.score("This is an important note for later", &ScoringHints::default());
        // base 50 + keyword 30 + length 5
        assert_eq!(p.score, 85);
        assert!(p.reason.contains("keyword +30"));

        let p = HeuristicScorer.score("what is the deadline?", &ScoringHints::default());
        // base 50 + length 5 + question 3 + structured 5
        assert_eq!(p.score, 63);
        assert_eq!(p.level, PriorityLevel::Medium);
    }

    #[test]
    fn user_and_recency_hints() {
        let hints = ScoringHints {
            is_recent: true,
            is_user_authored: true,
            ..Default::default()
        };
        let p = HeuristicScorer.score("hi", &hints);
        assert_eq!(p.score, 65);
        assert_eq!(p.level, PriorityLevel::High);
    }

    #[test]
    fn level_buckets() {
        assert_eq!(PriorityLevel::from_score(80), PriorityLevel::Critical);
        assert_eq!(PriorityLevel::from_score(79), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_score(65), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_score(64), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_score(40), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_score(39), PriorityLevel::Low);
        assert!(PriorityLevel::Critical > PriorityLevel::High);
    }

    #[test]
    fn sort_is_level_then_score_then_recency() {
        let mut messages = vec![
            msg(1, 70, 30), // high, older
            msg(2, 90, 50), // critical
            msg(3, 70, 10), // high, newer
            msg(4, 45, 0),  // medium
            msg(5, 72, 60), // high, better score
        ];
        sort_by_priority(&mut messages);
        let order: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
        assert_eq!(order, vec![2, 5, 3, 1, 4]);
    }

    #[test]
    fn sort_is_deterministic_on_full_ties() {
        let now = Utc::now();
        let mut a: Vec<_> = (0..6)
            .map(|i| {
                let mut m = msg(i, 60, 0);
                m.timestamp = now;
                m
            })
            .collect();
        let mut b = a.clone();
        b.reverse();
        sort_by_priority(&mut a);
        sort_by_priority(&mut b);
        let ids = |v: &[EnhancedMessage]| v.iter().map(|m| m.sequence).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(ids(&a), vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn filter_keeps_at_or_above_level() {
        let messages = vec![msg(1, 30, 0), msg(2, 50, 0), msg(3, 85, 0)];
        let kept = filter_by_priority(&messages, PriorityLevel::Medium);
        assert_eq!(kept.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![2, 3]);
    }
}
