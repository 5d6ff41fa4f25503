//! Failure diagnosis and recovery for persisted threads.
//!
//! [`analysis`] inspects a thread and suggests a [`RecoveryStrategy`];
//! [`RecoveryManager`] applies one against a
//! [`ThreadStore`](crate::storage::ThreadStore), bounded by a per-thread
//! retry budget.

pub mod analysis;
mod manager;

pub use analysis::{
    DECISION_TABLE, DecisionRule, RecoveryConfig, RecoveryContext, RecoveryStrategy, analyze,
};
pub use manager::{RecoveryManager, RecoveryResult};
