//! Thread storage port and its stock backends.
//!
//! | Backend | Use case |
//! |---------|----------|
//! | [`MemoryThreadStore`] | Tests, single-process embedding |
//! | [`FileThreadStore`] | One JSON snapshot per thread on local disk |
//!
//! Every backend validates a thread before writing it and stores the
//! versioned snapshot produced by [`serializer::serialize`](crate::thread::serializer::serialize).

mod file;
mod memory;

pub use file::FileThreadStore;
pub use memory::MemoryThreadStore;

use crate::error::Result;
use crate::thread::Thread;
use async_trait::async_trait;

/// Persistence port for threads, keyed by id.
///
/// The id a thread is saved under need not equal its `thread_id`:
/// checkpoints are saved under derived ids.
///
/// # Concurrency
///
/// Saves are last-write-wins. A caller must serialize "load, mutate, save"
/// per thread id; two writers racing on the same id is a caller error and
/// the later save replaces the earlier one whole. A save never merges or
/// partially writes a snapshot.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Validate and persist `thread` under `id`.
    async fn save(&self, id: &str, thread: &Thread) -> Result<()>;

    /// Load the thread stored under `id`, or
    /// [`ThreadError::NotFound`](crate::ThreadError::NotFound).
    async fn load(&self, id: &str) -> Result<Thread>;

    /// Remove `id`. Removing a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// All stored ids, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    async fn exists(&self, id: &str) -> Result<bool>;
}
