//! Applying recovery strategies against a [`ThreadStore`].

use super::analysis::{RecoveryConfig, RecoveryContext, RecoveryStrategy, analyze, rollback_checkpoint};
use crate::error::{Result, ThreadError};
use crate::storage::ThreadStore;
use crate::thread::{Thread, ThreadManager, fork, generate_thread_id};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outcome of one recovery attempt. Failures are reported here, not as
/// errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    /// The strategy that was actually applied. A rollback with no
    /// checkpoint reports `restart_from_beginning`.
    pub strategy: RecoveryStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_thread: Option<Thread>,
    /// Set when the restored thread lives under a new id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_thread_id: Option<String>,
    pub events_restored: usize,
    pub events_skipped: usize,
    /// Attempts counted against the thread's budget, including this one.
    pub attempts: u32,
    /// The request was refused because the budget was already spent.
    pub budget_exhausted: bool,
    pub message: String,
}

impl RecoveryResult {
    fn failed(strategy: RecoveryStrategy, message: impl Into<String>) -> Self {
        Self {
            success: false,
            strategy,
            restored_thread: None,
            new_thread_id: None,
            events_restored: 0,
            events_skipped: 0,
            attempts: 0,
            budget_exhausted: false,
            message: message.into(),
        }
    }

    /// Turn a failed result into an error for `?` propagation.
    pub fn into_result(self, thread_id: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else if self.budget_exhausted {
            Err(ThreadError::RecoveryExhausted {
                thread_id: thread_id.to_string(),
                attempts: self.attempts,
            })
        } else {
            Err(ThreadError::RecoveryFailed {
                thread_id: thread_id.to_string(),
                message: self.message,
            })
        }
    }
}

/// Diagnoses persisted threads and restores them.
///
/// Attempt counts live in this manager, keyed by thread id; once a thread
/// reaches `max_retries` every further request yields a manual-intervention
/// result until [`reset_attempts`](Self::reset_attempts) is called.
pub struct RecoveryManager {
    store: Arc<dyn ThreadStore>,
    config: RecoveryConfig,
    attempts: Mutex<HashMap<String, u32>>,
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn ThreadStore>, config: RecoveryConfig) -> Self {
        Self {
            store,
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub async fn attempts(&self, thread_id: &str) -> u32 {
        self.attempts.lock().await.get(thread_id).copied().unwrap_or(0)
    }

    pub async fn reset_attempts(&self, thread_id: &str) {
        self.attempts.lock().await.remove(thread_id);
    }

    /// Load `thread_id` and diagnose it.
    pub async fn analyze_failure(&self, thread_id: &str) -> Result<RecoveryContext> {
        let thread = self.store.load(thread_id).await?;
        let attempts = self.attempts(thread_id).await;
        Ok(analyze(&thread, Utc::now(), &self.config, attempts))
    }

    /// Diagnose, then apply the suggested strategy.
    pub async fn recover_auto(&self, thread_id: &str) -> Result<RecoveryResult> {
        let ctx = self.analyze_failure(thread_id).await?;
        info!(
            "Recovery for {thread_id}: {} ({})",
            ctx.suggested_strategy, ctx.reason
        );
        Ok(self.recover(thread_id, ctx.suggested_strategy).await)
    }

    /// Apply `strategy` to the thread stored under `thread_id`.
    ///
    /// Every restored thread is validated and saved before this returns.
    pub async fn recover(&self, thread_id: &str, strategy: RecoveryStrategy) -> RecoveryResult {
        if strategy == RecoveryStrategy::ManualIntervention {
            return self.manual(thread_id).await;
        }

        let attempt = {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.entry(thread_id.to_string()).or_insert(0);
            if *count >= self.config.max_retries {
                None
            } else {
                *count += 1;
                Some(*count)
            }
        };
        let Some(attempt) = attempt else {
            warn!(
                "Recovery budget exhausted for {thread_id} after {} attempt(s)",
                self.config.max_retries
            );
            let mut result = self.manual(thread_id).await;
            result.attempts = self.config.max_retries;
            result.budget_exhausted = true;
            result.message = format!(
                "retry budget of {} exhausted; {}",
                self.config.max_retries, result.message
            );
            return result;
        };

        let thread = match self.store.load(thread_id).await {
            Ok(t) => t,
            Err(e) => return RecoveryResult::failed(strategy, format!("load failed: {e}")),
        };
        info!(
            "Recovering {thread_id} with {strategy} (attempt {attempt}/{})",
            self.config.max_retries
        );

        let applied = match strategy {
            RecoveryStrategy::RestartFromBeginning => self.restart(&thread).await,
            RecoveryStrategy::ResumeFromLastEvent => self.resume(thread_id, thread).await,
            RecoveryStrategy::RollbackToCheckpoint => self.rollback(thread_id, thread).await,
            RecoveryStrategy::ForkAndRetry => self.fork_and_retry(&thread).await,
            RecoveryStrategy::ManualIntervention => return self.manual(thread_id).await,
        };
        let mut result = match applied {
            Ok(result) => result,
            Err(e) => {
                warn!("Recovery of {thread_id} with {strategy} failed: {e}");
                RecoveryResult::failed(strategy, e.to_string())
            }
        };
        result.attempts = attempt;
        result
    }

    /// Persist the current state as its own thread under
    /// `{thread_id}-checkpoint-{n}-{suffix}`, then append a `checkpoint_created`
    /// marker to the live thread. Returns the checkpoint id.
    pub async fn create_checkpoint(
        &self,
        manager: &mut ThreadManager,
        label: Option<String>,
    ) -> Result<String> {
        let checkpoint_id = checkpoint_id(manager.thread_id(), manager.events().len());
        let mut snapshot = manager.thread().clone();
        snapshot.thread_id = checkpoint_id.clone();
        self.store.save(&checkpoint_id, &snapshot).await?;
        manager.add_checkpoint(checkpoint_id.clone(), label)?;
        info!("Checkpoint {checkpoint_id} saved");
        Ok(checkpoint_id)
    }

    // ── Strategies ──

    async fn manual(&self, thread_id: &str) -> RecoveryResult {
        let detail = match self.store.load(thread_id).await {
            Ok(thread) => {
                let ctx = analyze(&thread, Utc::now(), &self.config, self.attempts(thread_id).await);
                match ctx.last_error {
                    Some(err) => format!("last error: {err}"),
                    None => format!("thread is {}", ctx.status),
                }
            }
            Err(e) => format!("load failed: {e}"),
        };
        RecoveryResult::failed(
            RecoveryStrategy::ManualIntervention,
            format!("manual intervention required for {thread_id}; {detail}"),
        )
    }

    async fn restart(&self, thread: &Thread) -> Result<RecoveryResult> {
        let new_id = generate_thread_id();
        let mut manager = ThreadManager::with_parent(new_id.clone(), thread.thread_id.clone());
        manager.reactivate();
        let restored = manager.into_thread();
        self.store.save(&new_id, &restored).await?;
        Ok(RecoveryResult {
            success: true,
            attempts: 0,
            budget_exhausted: false,
            strategy: RecoveryStrategy::RestartFromBeginning,
            restored_thread: Some(restored),
            new_thread_id: Some(new_id.clone()),
            events_restored: 0,
            events_skipped: thread.events.len(),
            message: format!("restarted {} as {new_id}", thread.thread_id),
        })
    }

    async fn resume(&self, id: &str, thread: Thread) -> Result<RecoveryResult> {
        let mut manager = ThreadManager::from_thread(thread)?;
        manager.reactivate();
        let restored = manager.into_thread();
        self.store.save(id, &restored).await?;
        Ok(RecoveryResult {
            success: true,
            attempts: 0,
            budget_exhausted: false,
            strategy: RecoveryStrategy::ResumeFromLastEvent,
            events_restored: restored.events.len(),
            events_skipped: 0,
            restored_thread: Some(restored),
            new_thread_id: None,
            message: format!("resumed {id} from its last event"),
        })
    }

    async fn rollback(&self, id: &str, thread: Thread) -> Result<RecoveryResult> {
        let Some(checkpoint) = rollback_checkpoint(&thread) else {
            warn!("No checkpoint in {}; restarting instead", thread.thread_id);
            let mut result = self.restart(&thread).await?;
            result.message = format!("no checkpoint to roll back to; {}", result.message);
            return Ok(result);
        };
        if checkpoint.event_index == 0 || checkpoint.event_index > thread.events.len() {
            return Err(ThreadError::invalid(format!(
                "checkpoint {} has unusable event index {}",
                checkpoint.checkpoint_id, checkpoint.event_index
            )));
        }

        let total = thread.events.len();
        let mut truncated = thread;
        truncated.events.truncate(checkpoint.event_index);
        if let Some(last) = truncated.events.last() {
            truncated.updated_at = last.timestamp;
        }
        let mut manager = ThreadManager::from_thread(truncated)?;
        manager.reactivate();
        let restored = manager.into_thread();
        self.store.save(id, &restored).await?;

        let skipped = total - restored.events.len();
        if skipped > 0 {
            warn!("Rollback of {id} dropped {skipped} event(s)");
        }
        Ok(RecoveryResult {
            success: true,
            attempts: 0,
            budget_exhausted: false,
            strategy: RecoveryStrategy::RollbackToCheckpoint,
            events_restored: restored.events.len(),
            events_skipped: skipped,
            restored_thread: Some(restored),
            new_thread_id: None,
            message: format!(
                "rolled {id} back to checkpoint {} at event {}",
                checkpoint.checkpoint_id, checkpoint.event_index
            ),
        })
    }

    async fn fork_and_retry(&self, thread: &Thread) -> Result<RecoveryResult> {
        let forked = fork(thread, None)?;
        let mut manager = ThreadManager::from_thread(forked)?;
        manager.reactivate();
        let restored = manager.into_thread();
        let new_id = restored.thread_id.clone();
        self.store.save(&new_id, &restored).await?;
        Ok(RecoveryResult {
            success: true,
            attempts: 0,
            budget_exhausted: false,
            strategy: RecoveryStrategy::ForkAndRetry,
            events_restored: restored.events.len(),
            events_skipped: 0,
            restored_thread: Some(restored),
            new_thread_id: Some(new_id.clone()),
            message: format!("forked {} as {new_id}", thread.thread_id),
        })
    }
}

fn checkpoint_id(thread_id: &str, event_index: usize) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{thread_id}-checkpoint-{event_index}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryThreadStore;
    use crate::thread::{EventType, ThreadStatus};
    use crate::{ToolCall, ToolOutcome};
    use serde_json::json;

    async fn store_with(thread: Thread) -> Arc<dyn ThreadStore> {
        let store = Arc::new(MemoryThreadStore::new());
        store.save(&thread.thread_id.clone(), &thread).await.unwrap();
        store
    }

    fn failed_tool_thread() -> Thread {
        let mut mgr = ThreadManager::new("t-rec");
        mgr.start_conversation("Create a launch task").unwrap();
        mgr.add_checkpoint("t-rec-checkpoint-2", None).unwrap();
        let call = ToolCall::new("c1", "create_task", json!({}));
        mgr.add_tool_executed(&call, ToolOutcome::failure("timeout"), None)
            .unwrap();
        mgr.into_thread()
    }

    #[tokio::test]
    async fn resume_reactivates_a_failed_thread() {
        let mut mgr = ThreadManager::new("t-fatal");
        mgr.start_conversation("hi").unwrap();
        mgr.add_error("provider down", false, None).unwrap();
        let store = store_with(mgr.into_thread()).await;
        let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());

        let result = recovery
            .recover("t-fatal", RecoveryStrategy::ResumeFromLastEvent)
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.events_restored, 3);
        let saved = store.load("t-fatal").await.unwrap();
        assert_eq!(saved.status, ThreadStatus::Active);
    }

    #[tokio::test]
    async fn rollback_truncates_at_checkpoint() {
        let store = store_with(failed_tool_thread()).await;
        let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());
        let result = recovery
            .recover("t-rec", RecoveryStrategy::RollbackToCheckpoint)
            .await;
        assert!(result.success);
        assert_eq!(result.events_restored, 2);
        assert_eq!(result.events_skipped, 2);
        assert_eq!(store.load("t-rec").await.unwrap().events.len(), 2);
    }

    #[tokio::test]
    async fn rollback_without_checkpoint_restarts() {
        let mut mgr = ThreadManager::new("t-nocp");
        mgr.start_conversation("hi").unwrap();
        mgr.add_error("oops", true, None).unwrap();
        let store = store_with(mgr.into_thread()).await;
        let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());
        let result = recovery
            .recover("t-nocp", RecoveryStrategy::RollbackToCheckpoint)
            .await;
        assert!(result.success);
        assert_eq!(result.strategy, RecoveryStrategy::RestartFromBeginning);
        let new_id = result.new_thread_id.unwrap();
        let fresh = store.load(&new_id).await.unwrap();
        assert_eq!(fresh.events.len(), 1);
        assert_eq!(fresh.status, ThreadStatus::Active);
        // The original is untouched.
        assert_eq!(store.load("t-nocp").await.unwrap().events.len(), 3);
    }

    #[tokio::test]
    async fn fork_leaves_original_untouched() {
        let original = failed_tool_thread();
        let store = store_with(original.clone()).await;
        let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());
        let result = recovery.recover("t-rec", RecoveryStrategy::ForkAndRetry).await;
        assert!(result.success);
        let fork_id = result.new_thread_id.unwrap();
        assert!(fork_id.starts_with("t-rec-fork-"));
        assert_eq!(store.load("t-rec").await.unwrap(), original);
        let forked = store.load(&fork_id).await.unwrap();
        assert_eq!(forked.events.len(), original.events.len());
        assert_eq!(forked.status, ThreadStatus::Active);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let store = store_with(failed_tool_thread()).await;
        let config = RecoveryConfig::default().with_max_retries(2);
        let recovery = RecoveryManager::new(store, config);

        for _ in 0..2 {
            let r = recovery.recover("t-rec", RecoveryStrategy::ResumeFromLastEvent).await;
            assert!(r.success);
        }
        let r = recovery.recover("t-rec", RecoveryStrategy::ResumeFromLastEvent).await;
        assert!(!r.success);
        assert_eq!(r.strategy, RecoveryStrategy::ManualIntervention);
        assert!(r.message.contains("exhausted"));
        assert!(r.budget_exhausted);
        assert!(matches!(
            r.into_result("t-rec"),
            Err(ThreadError::RecoveryExhausted { attempts: 2, .. })
        ));

        let ctx = recovery.analyze_failure("t-rec").await.unwrap();
        assert_eq!(ctx.suggested_strategy, RecoveryStrategy::ManualIntervention);

        recovery.reset_attempts("t-rec").await;
        assert_eq!(recovery.attempts("t-rec").await, 0);
    }

    #[tokio::test]
    async fn missing_thread_is_a_failed_result() {
        let recovery = RecoveryManager::new(Arc::new(MemoryThreadStore::new()), RecoveryConfig::default());
        let r = recovery.recover("ghost", RecoveryStrategy::ResumeFromLastEvent).await;
        assert!(!r.success);
        assert!(r.message.contains("load failed"));
        assert!(recovery.analyze_failure("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn recover_auto_follows_the_diagnosis() {
        let store = store_with(failed_tool_thread()).await;
        let recovery = RecoveryManager::new(store, RecoveryConfig::default());
        let r = recovery.recover_auto("t-rec").await.unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::RollbackToCheckpoint);
    }

    #[tokio::test]
    async fn checkpoint_snapshot_then_marker() {
        let store: Arc<dyn ThreadStore> = Arc::new(MemoryThreadStore::new());
        let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());
        let mut mgr = ThreadManager::new("t-live");
        mgr.start_conversation("hi").unwrap();

        let id = recovery
            .create_checkpoint(&mut mgr, Some("before tools".into()))
            .await
            .unwrap();
        assert!(id.starts_with("t-live-checkpoint-2-"));
        let snapshot = store.load(&id).await.unwrap();
        assert_eq!(snapshot.thread_id, id);
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(mgr.events().len(), 3);
        assert_eq!(
            mgr.thread().last_event().map(|e| e.event_type()),
            Some(EventType::CheckpointCreated)
        );
    }

    #[tokio::test]
    async fn recovering_a_checkpoint_leaves_the_live_thread_alone() {
        let store: Arc<dyn ThreadStore> = Arc::new(MemoryThreadStore::new());
        let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());
        let mut mgr = ThreadManager::new("t-live");
        mgr.start_conversation("hi").unwrap();
        let cp = recovery.create_checkpoint(&mut mgr, None).await.unwrap();
        for i in 0..2 {
            mgr.add_assistant_message(format!("reply {i}")).unwrap();
            mgr.add_user_message(format!("follow-up {i}")).unwrap();
        }
        store.save("t-live", mgr.thread()).await.unwrap();

        let resumed = recovery
            .recover(&cp, RecoveryStrategy::ResumeFromLastEvent)
            .await;
        assert!(resumed.success, "{}", resumed.message);
        assert_eq!(resumed.restored_thread.unwrap().thread_id, cp);
        assert_eq!(store.load("t-live").await.unwrap(), *mgr.thread());

        let rolled_back = recovery
            .recover(&cp, RecoveryStrategy::RollbackToCheckpoint)
            .await;
        assert!(rolled_back.success, "{}", rolled_back.message);
        assert_eq!(store.load("t-live").await.unwrap(), *mgr.thread());
        assert_eq!(store.load(&cp).await.unwrap().status, ThreadStatus::Active);
    }

    #[tokio::test]
    async fn checkpoints_on_diverging_branches_do_not_collide() {
        let store: Arc<dyn ThreadStore> = Arc::new(MemoryThreadStore::new());
        let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());
        let mut mgr = ThreadManager::new("t-branch");
        mgr.start_conversation("hi").unwrap();
        recovery.create_checkpoint(&mut mgr, None).await.unwrap();
        mgr.add_user_message("branch a").unwrap();
        let first = recovery.create_checkpoint(&mut mgr, None).await.unwrap();

        // Rolled back to the first marker, then diverged.
        let mut rolled_back = mgr.thread().clone();
        rolled_back.events.truncate(3);
        let mut other = ThreadManager::from_thread(rolled_back).unwrap();
        other.add_user_message("branch b").unwrap();
        let second = recovery.create_checkpoint(&mut other, None).await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("t-branch-checkpoint-4-"));
        assert!(second.starts_with("t-branch-checkpoint-4-"));
        let last_message = |t: Thread| t.derived_state().message_history.last().cloned();
        let a = last_message(store.load(&first).await.unwrap()).unwrap();
        let b = last_message(store.load(&second).await.unwrap()).unwrap();
        assert_eq!(a.content.as_deref(), Some("branch a"));
        assert_eq!(b.content.as_deref(), Some("branch b"));
    }
}
