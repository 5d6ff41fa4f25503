//! Context window management: token estimation, prioritization,
//! summarization, and budgeted optimization.
//!
//! 1. **[`tokens`]**: [`TokenEstimator`], a conservative chars-per-token
//!    heuristic with a fixed buffer and per-message overhead.
//! 2. **[`priority`]**: the pluggable [`PriorityScorer`] and the total order
//!    used for deterministic eviction.
//! 3. **[`summarizer`]**: extractive, fixed-size [`ConversationSummary`]
//!    that merges by concatenation.
//! 4. **[`optimizer`]**: [`ContextOptimizer`], which keeps one
//!    [`ContextWindow`] within `max_tokens - reserved_tokens`.
//! 5. **[`layout`]**: [`PromptContext`], the summary plus visible window
//!    handed to the LLM collaborator.

pub mod layout;
pub mod optimizer;
pub mod priority;
pub mod summarizer;
pub mod tokens;

pub use layout::{ContextBreakdown, PromptContext};
pub use optimizer::{
    ContextOptimizer, ContextWindow, EnhancedMessage, OptimizationOutcome, OptimizationResult,
    OptimizerConfig, OptimizerStats, message_for_event,
};
pub use priority::{
    HeuristicScorer, Priority, PriorityLevel, PriorityScorer, ScoringHints, filter_by_priority,
    sort_by_priority,
};
pub use summarizer::ConversationSummary;
pub use tokens::{ContextUsage, TokenEstimator};
