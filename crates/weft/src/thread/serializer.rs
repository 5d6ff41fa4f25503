//! Durable representation of a thread.
//!
//! Snapshots are wrapped in a versioned envelope:
//!
//! ```json
//! {"version": "1.0", "thread": {"threadId": "...", "createdAt": {"$datetime": "..."}, ...}}
//! ```
//!
//! Every date is written as an explicit `{"$datetime": "<RFC 3339, nanos, UTC>"}`
//! tag so that it decodes to the exact same instant regardless of who reads it.
//! Loaders reject snapshots whose major version differs from [`FORMAT_VERSION`].

use crate::error::{Result, ThreadError};
use crate::thread::ThreadStatus;
use crate::thread::event::{EventData, EventType};
use crate::thread::manager::Thread;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Current snapshot format version.
pub const FORMAT_VERSION: &str = "1.0";

/// Major component of [`FORMAT_VERSION`]; snapshots must match it.
pub const FORMAT_MAJOR: u32 = 1;

// ── Tagged dates ───────────────────────────────────────────────────

/// Serde adapter for `{"$datetime": "..."}` tagged timestamps.
pub mod tagged_date {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Tagged {
        #[serde(rename = "$datetime")]
        value: String,
    }

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged {
            value: date.to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let tagged = Tagged::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&tagged.value)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| serde::de::Error::custom(format!("bad $datetime {:?}: {e}", tagged.value)))
    }
}

// ── Envelope ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: &'a str,
    thread: &'a Thread,
}

#[derive(Deserialize)]
struct Envelope {
    version: String,
    thread: serde_json::Value,
}

/// Encode a thread as a versioned JSON snapshot.
pub fn serialize(thread: &Thread) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        version: FORMAT_VERSION,
        thread,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Decode a snapshot produced by [`serialize`].
///
/// Structural validation is not run here; call [`validate`] when the
/// snapshot comes from an untrusted source.
pub fn deserialize(bytes: &[u8]) -> Result<Thread> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    check_version(&envelope.version)?;
    Ok(serde_json::from_value(envelope.thread)?)
}

fn check_version(version: &str) -> Result<()> {
    let major = version
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok());
    if major == Some(FORMAT_MAJOR) {
        Ok(())
    } else {
        Err(ThreadError::UnsupportedVersion {
            found: version.to_string(),
            expected_major: FORMAT_MAJOR,
        })
    }
}

// ── Validation ─────────────────────────────────────────────────────

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Convert into a `Result`, failing with every collected message.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(ThreadError::Validation(self.errors))
        }
    }
}

/// Check the structural invariants of a thread.
///
/// Collects every problem instead of stopping at the first one.
pub fn validate(thread: &Thread) -> ValidationReport {
    let mut errors = Vec::new();

    if thread.thread_id.trim().is_empty() {
        errors.push("threadId is empty".to_string());
    }
    if thread.updated_at < thread.created_at {
        errors.push("updatedAt precedes createdAt".to_string());
    }

    match thread.events.first() {
        None => errors.push("thread has no events".to_string()),
        Some(first) if first.event_type() != EventType::ThreadCreated => errors.push(format!(
            "first event must be thread_created, found {}",
            first.data.type_name()
        )),
        Some(_) => {}
    }

    let created = thread
        .events
        .iter()
        .filter(|e| e.event_type() == EventType::ThreadCreated)
        .count();
    if created > 1 {
        errors.push(format!("found {created} thread_created events, expected exactly one"));
    }

    let mut seen = HashSet::new();
    let mut previous: Option<DateTime<Utc>> = None;
    for (i, event) in thread.events.iter().enumerate() {
        if event.id.trim().is_empty() {
            errors.push(format!("event {i} has an empty id"));
        } else if !seen.insert(event.id.as_str()) {
            errors.push(format!("event {i} reuses id {}", event.id));
        }

        if let Some(prev) = previous
            && event.timestamp < prev
        {
            errors.push(format!(
                "event {i} ({}) is earlier than the event before it",
                event.data.type_name()
            ));
        }
        previous = Some(event.timestamp);

        match &event.data {
            EventData::CheckpointCreated {
                checkpoint_id,
                event_index,
                ..
            } => {
                if checkpoint_id.trim().is_empty() {
                    errors.push(format!("checkpoint at event {i} has an empty checkpointId"));
                }
                if *event_index > i {
                    errors.push(format!(
                        "checkpoint at event {i} points forward to index {event_index}"
                    ));
                }
            }
            EventData::ToolExecuted { tool_name, .. } if tool_name.trim().is_empty() => {
                errors.push(format!("tool_executed at event {i} has an empty toolName"));
            }
            _ => {}
        }
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
    }
}

// ── Fork ───────────────────────────────────────────────────────────

/// Derive the id of a fork of `thread_id`.
pub fn fork_id(thread_id: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{thread_id}-fork-{suffix}")
}

/// Copy a prefix of `thread` (`events[0..=upto]`, or the whole log) into a
/// new, paused thread with a derived id. The source is never touched.
pub fn fork(thread: &Thread, upto: Option<usize>) -> Result<Thread> {
    let len = thread.events.len();
    let end = match upto {
        Some(index) if index >= len => {
            return Err(ThreadError::invalid(format!(
                "fork index {index} is out of range for {len} events"
            )));
        }
        Some(index) => index + 1,
        None => len,
    };

    let events = thread.events[..end].to_vec();
    let updated_at = if end == len {
        thread.updated_at
    } else {
        events.last().map_or(thread.updated_at, |e| e.timestamp)
    };

    Ok(Thread {
        thread_id: fork_id(&thread.thread_id),
        created_at: thread.created_at,
        updated_at,
        status: ThreadStatus::Paused,
        events,
    })
}

// ── Statistics ─────────────────────────────────────────────────────

/// Observability summary of a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStatistics {
    pub thread_id: String,
    pub status: ThreadStatus,
    pub event_count: usize,
    pub duration_ms: i64,
    pub events_per_minute: f64,
    pub event_type_counts: BTreeMap<String, usize>,
    /// Size of the serialized snapshot in bytes (0 if encoding failed).
    pub serialized_size_bytes: usize,
}

impl ThreadStatistics {
    /// One-line summary for logs and the CLI.
    pub fn to_log_string(&self) -> String {
        format!(
            "{} [{}]: {} events over {:.1}s ({:.2}/min), ~{} bytes",
            self.thread_id,
            self.status,
            self.event_count,
            self.duration_ms as f64 / 1000.0,
            self.events_per_minute,
            self.serialized_size_bytes,
        )
    }
}

pub fn thread_statistics(thread: &Thread) -> ThreadStatistics {
    let duration_ms = (thread.updated_at - thread.created_at)
        .num_milliseconds()
        .max(0);
    let event_count = thread.events.len();
    let events_per_minute = if duration_ms > 0 {
        event_count as f64 / (duration_ms as f64 / 60_000.0)
    } else {
        0.0
    };

    let mut event_type_counts = BTreeMap::new();
    for event in &thread.events {
        *event_type_counts
            .entry(event.data.type_name().to_string())
            .or_insert(0) += 1;
    }

    ThreadStatistics {
        thread_id: thread.thread_id.clone(),
        status: thread.status,
        event_count,
        duration_ms,
        events_per_minute,
        event_type_counts,
        serialized_size_bytes: serialize(thread).map_or(0, |b| b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::event::{Event, EventMetadata};
    use crate::thread::manager::ThreadManager;
    use chrono::{Duration, TimeZone};

    fn sample_thread() -> Thread {
        let mut mgr = ThreadManager::new("t-serial");
        mgr.start_conversation("Create a task called launch review")
            .unwrap();
        mgr.add_assistant_message("Which due date?").unwrap();
        mgr.into_thread()
    }

    #[test]
    fn tagged_date_keeps_nanoseconds() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Holder {
            #[serde(with = "tagged_date")]
            at: DateTime<Utc>,
        }
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let json = serde_json::to_value(Holder { at }).unwrap();
        assert_eq!(json["at"]["$datetime"], "2023-11-14T22:13:20.123456789Z");
        let back: Holder = serde_json::from_value(json).unwrap();
        assert_eq!(back.at, at);
    }

    #[test]
    fn envelope_roundtrip_is_exact() {
        let thread = sample_thread();
        let bytes = serialize(&thread).unwrap();
        let back = deserialize(&bytes).unwrap();
        assert_eq!(back, thread);
    }

    #[test]
    fn rejects_other_major_version() {
        let thread = sample_thread();
        let mut json: serde_json::Value = serde_json::from_slice(&serialize(&thread).unwrap()).unwrap();
        json["version"] = "2.0".into();
        let err = deserialize(&serde_json::to_vec(&json).unwrap()).unwrap_err();
        assert!(matches!(err, ThreadError::UnsupportedVersion { .. }));

        json["version"] = "1.7".into();
        assert!(deserialize(&serde_json::to_vec(&json).unwrap()).is_ok());
    }

    #[test]
    fn validate_accepts_manager_output() {
        let report = validate(&sample_thread());
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn validate_rejects_out_of_order_events() {
        let mut thread = sample_thread();
        let last = thread.events.len() - 1;
        thread.events[last].timestamp = thread.events[0].timestamp - Duration::seconds(10);
        let report = validate(&thread);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("earlier")));
        assert!(matches!(report.into_result(), Err(ThreadError::Validation(_))));
    }

    #[test]
    fn validate_requires_single_leading_thread_created() {
        let mut thread = sample_thread();
        thread.events.remove(0);
        assert!(!validate(&thread).is_valid);

        let mut thread = sample_thread();
        let dup = Event::new(
            EventData::ThreadCreated {
                parent_thread_id: None,
                user_id: None,
            },
            EventMetadata::new(),
            thread.updated_at,
        );
        thread.events.push(dup);
        let report = validate(&thread);
        assert!(report.errors.iter().any(|e| e.contains("exactly one")));
    }

    #[test]
    fn validate_flags_duplicate_ids() {
        let mut thread = sample_thread();
        let id = thread.events[1].id.clone();
        thread.events[2].id = id;
        assert!(validate(&thread).errors.iter().any(|e| e.contains("reuses id")));
    }

    #[test]
    fn fork_prefix_is_paused_and_source_untouched() {
        let thread = sample_thread();
        let before = thread.clone();
        let forked = fork(&thread, Some(1)).unwrap();

        assert_eq!(thread, before);
        assert_ne!(forked.thread_id, thread.thread_id);
        assert!(forked.thread_id.starts_with("t-serial-fork-"));
        assert_eq!(forked.events, thread.events[..2]);
        assert_eq!(forked.status, ThreadStatus::Paused);
        assert_eq!(forked.updated_at, thread.events[1].timestamp);
        assert_eq!(forked.created_at, thread.created_at);
    }

    #[test]
    fn full_fork_keeps_updated_at() {
        let thread = sample_thread();
        let forked = fork(&thread, None).unwrap();
        assert_eq!(forked.events, thread.events);
        assert_eq!(forked.updated_at, thread.updated_at);
    }

    #[test]
    fn fork_index_out_of_range_is_an_error() {
        let thread = sample_thread();
        assert!(fork(&thread, Some(thread.events.len())).is_err());
    }

    #[test]
    fn statistics_count_types() {
        let stats = thread_statistics(&sample_thread());
        assert_eq!(stats.event_count, 3);
        assert_eq!(stats.event_type_counts["user_message"], 1);
        assert_eq!(stats.event_type_counts["thread_created"], 1);
        assert!(stats.serialized_size_bytes > 0);
        assert!(stats.to_log_string().starts_with("t-serial [active]"));
    }
}
