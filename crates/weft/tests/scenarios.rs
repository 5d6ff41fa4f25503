//! End-to-end behavior of the thread engine: the optimizer under a long
//! conversation, failure diagnosis and rollback, fork isolation, and
//! snapshots on disk.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use weft::context::{
    ContextOptimizer, OptimizationOutcome, OptimizerConfig, filter_by_priority, sort_by_priority,
};
use weft::context::{PriorityLevel, ScoringHints};
use weft::recovery::{RecoveryConfig, RecoveryManager, RecoveryStrategy};
use weft::storage::{FileThreadStore, MemoryThreadStore, ThreadStore};
use weft::thread::{
    EventData, EventType, Thread, ThreadManager, ThreadStatus, fork, project, serializer, validate,
};
use weft::{Message, ThreadError, ToolCall, ToolOutcome};

/// `thread_created`, a user message, a checkpoint at index 2, then a
/// failed tool execution at index 3.
fn thread_with_failed_tool(id: &str) -> Thread {
    let mut mgr = ThreadManager::new(id);
    mgr.start_conversation("Create a task called launch review")
        .unwrap();
    mgr.add_checkpoint(format!("{id}-checkpoint-2"), Some("before tools".into()))
        .unwrap();
    let call = ToolCall::new("call-1", "create_task", json!({"title": "launch review"}));
    mgr.add_tool_executed(&call, ToolOutcome::failure("task service returned 503"), Some(120))
        .unwrap();
    mgr.into_thread()
}

// ── Context optimizer ────────────────────────────────────────────────

#[test]
fn long_conversation_summarizes_once_and_stays_in_budget() {
    let config = OptimizerConfig::default()
        .with_max_tokens(8000)
        .with_reserved_tokens(1000)
        .with_summary_threshold(10)
        .with_max_history_messages(8);
    let budget = config.history_budget();
    let mut optimizer = ContextOptimizer::new(config);
    let mut mgr = ThreadManager::new("t-long");

    let created = mgr.events()[0].clone();
    assert_eq!(
        optimizer.add_event(&created).outcome,
        OptimizationOutcome::NotNeeded
    );

    let mut summary_at = Vec::new();
    for i in 1..=12 {
        let event = match i {
            1 => mgr.start_conversation(format!("User turn {i}: plan the offsite")),
            i if i % 2 == 1 => mgr.add_user_message(format!("User turn {i}: what about catering?")),
            _ => mgr.add_assistant_message(format!("Assistant turn {i}: noted.")),
        }
        .unwrap();
        let result = optimizer.add_event(&event);
        assert!(result.check().is_ok());
        if result.summary_generated {
            summary_at.push(i);
            assert!(optimizer.window().messages.len() < 8);
        }
        assert!(optimizer.window().current_tokens <= budget);
    }

    assert_eq!(summary_at, vec![10]);
    let window = optimizer.window();
    assert!(window.summary.is_some());
    assert!(window.messages.len() <= 8);
    assert!(window.current_tokens <= budget);
    assert_eq!(optimizer.stats().summaries_generated, 1);
}

#[test]
fn oversized_message_is_reported_and_window_untouched() {
    let config = OptimizerConfig::default()
        .with_max_tokens(200)
        .with_reserved_tokens(100);
    let mut optimizer = ContextOptimizer::new(config);
    optimizer.add_message(
        Message::user("short"),
        ScoringHints::default(),
        chrono::Utc::now(),
        None,
    );
    let before = optimizer.window().clone();

    let huge = "x".repeat(10_000);
    let result = optimizer.add_message(
        Message::user(huge),
        ScoringHints::default(),
        chrono::Utc::now(),
        None,
    );
    assert!(matches!(
        result.outcome,
        OptimizationOutcome::BudgetExceeded { available: 100, .. }
    ));
    assert!(matches!(
        result.check(),
        Err(ThreadError::BudgetExceeded { .. })
    ));
    assert_eq!(optimizer.window().messages.len(), before.messages.len());
    assert_eq!(optimizer.window().current_tokens, before.current_tokens);
}

#[test]
fn budget_holds_for_any_mix_of_message_sizes() {
    let config = OptimizerConfig::default()
        .with_max_tokens(1200)
        .with_reserved_tokens(200)
        .with_summary_threshold(6)
        .with_max_history_messages(30);
    let budget = config.history_budget();
    let mut optimizer = ContextOptimizer::new(config);
    for i in 0..60usize {
        let text = "word ".repeat((i * 37) % 120 + 1);
        let result = optimizer.add_message(
            Message::assistant_text(text),
            ScoringHints::default(),
            chrono::Utc::now(),
            None,
        );
        assert!(result.check().is_ok());
        assert!(
            optimizer.window().current_tokens <= budget,
            "over budget after message {i}: {}",
            optimizer.usage().to_log_string()
        );
    }
}

#[test]
fn priority_sort_is_deterministic() {
    let mut optimizer = ContextOptimizer::new(OptimizerConfig::default());
    let texts = [
        "ok",
        "Decided: the deadline is Friday, must not slip",
        "{\"taskId\": 12}",
        "thanks",
        "I prefer morning meetings",
        "ok",
    ];
    for text in texts {
        optimizer.add_message(
            Message::user(text),
            ScoringHints::default(),
            chrono::Utc::now(),
            None,
        );
    }

    let mut forward = optimizer.window().messages.clone();
    let mut backward = forward.clone();
    backward.reverse();
    sort_by_priority(&mut forward);
    sort_by_priority(&mut backward);
    let seq = |v: &[weft::context::EnhancedMessage]| v.iter().map(|m| m.sequence).collect::<Vec<_>>();
    assert_eq!(seq(&forward), seq(&backward));

    let high = filter_by_priority(&forward, PriorityLevel::High);
    assert!(high.iter().all(|m| m.priority.level >= PriorityLevel::High));
}

// ── Recovery ─────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_tool_after_checkpoint_suggests_rollback() {
    let store = Arc::new(MemoryThreadStore::new());
    store
        .save("t-fail", &thread_with_failed_tool("t-fail"))
        .await
        .unwrap();
    let recovery = RecoveryManager::new(store, RecoveryConfig::default());

    let ctx = recovery.analyze_failure("t-fail").await.unwrap();
    assert!(ctx.has_errors);
    assert_eq!(ctx.suggested_strategy, RecoveryStrategy::RollbackToCheckpoint);
    assert_eq!(ctx.checkpoint_event_index, Some(2));
}

#[tokio::test]
async fn rollback_restores_the_prefix_as_active() {
    let store = Arc::new(MemoryThreadStore::new());
    store
        .save("t-fail", &thread_with_failed_tool("t-fail"))
        .await
        .unwrap();
    let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());

    let result = recovery
        .recover("t-fail", RecoveryStrategy::RollbackToCheckpoint)
        .await;
    assert!(result.success, "{}", result.message);
    let restored = result.restored_thread.unwrap();
    assert_eq!(restored.events.len(), 2);
    assert_eq!(restored.status, ThreadStatus::Active);
    assert!(validate(&restored).is_valid);

    let saved = store.load("t-fail").await.unwrap();
    assert_eq!(saved, restored);
    assert_eq!(
        saved.events.iter().map(|e| e.event_type()).collect::<Vec<_>>(),
        vec![EventType::ThreadCreated, EventType::UserMessage]
    );
}

#[tokio::test]
async fn stalled_thread_is_forked_and_original_kept() {
    let store = Arc::new(MemoryThreadStore::new());
    let mut mgr = ThreadManager::new("t-stalled");
    mgr.start_conversation("hello").unwrap();
    let mut thread = mgr.into_thread();
    // Push the whole thread ten minutes into the past.
    let shift = Duration::minutes(10);
    thread.created_at -= shift;
    thread.updated_at -= shift;
    for event in &mut thread.events {
        event.timestamp -= shift;
    }
    store.save("t-stalled", &thread).await.unwrap();

    let recovery = RecoveryManager::new(store.clone(), RecoveryConfig::default());
    let result = recovery.recover_auto("t-stalled").await.unwrap();
    assert_eq!(result.strategy, RecoveryStrategy::ForkAndRetry);
    let new_id = result.new_thread_id.unwrap();
    assert_ne!(new_id, "t-stalled");
    assert_eq!(store.load("t-stalled").await.unwrap(), thread);
    assert_eq!(store.load(&new_id).await.unwrap().status, ThreadStatus::Active);
}

// ── Fork ─────────────────────────────────────────────────────────────

#[test]
fn full_fork_is_an_independent_copy() {
    let original = thread_with_failed_tool("t-src");
    let mut copy = fork(&original, None).unwrap();

    assert_ne!(copy.thread_id, original.thread_id);
    assert_eq!(copy.events, original.events);
    assert_eq!(copy.status, ThreadStatus::Paused);

    let before = original.clone();
    copy.status = ThreadStatus::Active;
    let mut forked = ThreadManager::from_thread(copy).unwrap();
    forked.add_user_message("try a different tool").unwrap();
    assert_eq!(forked.events().len(), original.events.len() + 1);
    assert_eq!(original, before);
}

#[test]
fn prefix_fork_keeps_exactly_the_prefix() {
    let original = thread_with_failed_tool("t-src");
    let prefix = fork(&original, Some(1)).unwrap();
    assert_eq!(prefix.events.as_slice(), &original.events[..2]);
    assert_eq!(prefix.status, ThreadStatus::Paused);
    assert!(fork(&original, Some(original.events.len())).is_err());
}

// ── Snapshots ────────────────────────────────────────────────────────

#[tokio::test]
async fn file_snapshot_round_trips_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileThreadStore::new(dir.path());
    let mut mgr = ThreadManager::new("t-disk");
    mgr.start_conversation("Create a task").unwrap();
    mgr.add_info_collected("priority", json!("high")).unwrap();
    mgr.add_tool_call_generated(
        ToolCall::new("q1", "ask_question", json!({"question": "Due date?"})),
        Some("need a due date".into()),
    )
    .unwrap();
    mgr.add_user_message("Friday").unwrap();
    mgr.complete(Some("task created".into())).unwrap();
    let thread = mgr.into_thread();

    store.save("t-disk", &thread).await.unwrap();
    let loaded = store.load("t-disk").await.unwrap();
    assert_eq!(loaded, thread);
    assert_eq!(project(&loaded.events), thread.derived_state());
    assert_eq!(store.list().await.unwrap(), vec!["t-disk".to_string()]);
}

#[test]
fn unknown_event_types_survive_a_load_save_cycle() {
    let raw = json!({
        "version": "1.3",
        "thread": {
            "threadId": "t-future",
            "createdAt": {"$datetime": "2025-03-01T10:00:00.000000000Z"},
            "updatedAt": {"$datetime": "2025-03-01T10:00:02.000000000Z"},
            "status": "active",
            "events": [
                {
                    "id": "evt_1",
                    "type": "thread_created",
                    "timestamp": {"$datetime": "2025-03-01T10:00:00.000000000Z"},
                    "data": {}
                },
                {
                    "id": "evt_2",
                    "type": "sentiment_scored",
                    "timestamp": {"$datetime": "2025-03-01T10:00:02.000000000Z"},
                    "data": {"score": 0.4}
                }
            ]
        }
    });
    let thread = serializer::deserialize(raw.to_string().as_bytes()).unwrap();
    assert!(validate(&thread).is_valid);
    assert!(matches!(
        &thread.events[1].data,
        EventData::Unknown { event_type, .. } if event_type == "sentiment_scored"
    ));

    let bytes = serializer::serialize(&thread).unwrap();
    let again: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(again["version"], "1.0");
    assert_eq!(again["thread"]["events"][1]["type"], "sentiment_scored");
    assert_eq!(again["thread"]["events"][1]["data"]["score"], 0.4);
}

#[test]
fn out_of_order_timestamps_are_rejected() {
    let mut thread = thread_with_failed_tool("t-order");
    thread.events[2].timestamp = thread.events[1].timestamp - Duration::seconds(5);
    let report = validate(&thread);
    assert!(!report.is_valid);
    assert!(matches!(report.into_result(), Err(ThreadError::Validation(_))));
    assert!(ThreadManager::from_thread(thread).is_err());
}

#[test]
fn newer_major_version_is_refused() {
    let bytes = serializer::serialize(&thread_with_failed_tool("t-v")).unwrap();
    let text = String::from_utf8(bytes).unwrap().replacen("\"1.0\"", "\"2.0\"", 1);
    assert!(matches!(
        serializer::deserialize(text.as_bytes()),
        Err(ThreadError::UnsupportedVersion { .. })
    ));
}
