//! Thread lifecycle state machine.
//!
//! ```text
//! idle -> active -> {waiting_input, completed, failed, paused}
//! idle -> failed
//! waiting_input | paused -> (resume) -> active
//! any non-terminal -> cancelled
//! ```
//!
//! `completed`, `failed` and `cancelled` are terminal. `paused` and
//! `waiting_input` are suspending and resumable.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a thread.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Idle,
    Active,
    WaitingInput,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl ThreadStatus {
    /// Terminal states accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ThreadStatus::Completed | ThreadStatus::Failed | ThreadStatus::Cancelled
        )
    }

    /// Suspending states wait for a resume (or user input) before continuing.
    pub fn is_suspended(self) -> bool {
        matches!(self, ThreadStatus::Paused | ThreadStatus::WaitingInput)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Staying in the same non-terminal state is always allowed so that
    /// mutators can be called repeatedly (e.g. several tool results while
    /// `active`).
    pub fn can_transition_to(self, next: ThreadStatus) -> bool {
        use ThreadStatus::*;
        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Idle, Active | Failed) => true,
            (Idle, _) => false,
            (Active, Idle) => false,
            (Active, _) => true,
            (WaitingInput | Paused, Active) => true,
            (WaitingInput, Paused) | (Paused, WaitingInput) => true,
            (WaitingInput | Paused, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Idle => "idle",
            ThreadStatus::Active => "active",
            ThreadStatus::WaitingInput => "waiting_input",
            ThreadStatus::Completed => "completed",
            ThreadStatus::Failed => "failed",
            ThreadStatus::Paused => "paused",
            ThreadStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
