use super::ThreadStore;
use crate::error::{Result, ThreadError};
use crate::thread::{Thread, serializer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSION: &str = "json";

/// One snapshot file per thread id.
///
/// Directory layout:
/// ```text
/// store_dir/
///   thread_4f1c.json
///   thread_4f1c-checkpoint-7-9b2e01c4.json
///   thread_4f1c-fork-9a2b3c4d.json
/// ```
///
/// Writes go to a hidden temp file first and are renamed into place, so a
/// reader never sees a half-written snapshot.
pub struct FileThreadStore {
    dir: PathBuf,
}

impl FileThreadStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        check_id(id)?;
        Ok(self.dir.join(format!("{id}.{EXTENSION}")))
    }
}

/// Ids become file names: only ASCII alphanumerics, `-`, `_` and `.` are
/// accepted, and the id may not start with a dot.
fn check_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ThreadError::Storage(format!("invalid thread id {id:?}")))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> ThreadError {
    ThreadError::Storage(format!("failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    async fn save(&self, id: &str, thread: &Thread) -> Result<()> {
        let final_path = self.path_for(id)?;
        serializer::validate(thread).into_result()?;
        let bytes = serializer::serialize(thread)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create", &self.dir, e))?;
        let tmp_path = self.dir.join(format!(".{id}.{EXTENSION}.tmp"));
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| io_error("write", &tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| io_error("rename", &tmp_path, e))?;

        debug!("saved thread {id} to {}", final_path.display());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Thread> {
        let path = self.path_for(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ThreadError::NotFound(id.to_string()));
            }
            Err(e) => return Err(io_error("read", &path, e)),
        };
        debug!("loaded thread {id} ({} bytes)", bytes.len());
        serializer::deserialize(&bytes)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete", &path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("read", &self.dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("read", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if check_id(stem).is_ok() => ids.push(stem.to_string()),
                _ => warn!("Skipping unexpected file in thread store: {}", path.display()),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("stat", &path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadManager;

    fn thread(id: &str) -> Thread {
        let mut mgr = ThreadManager::new(id);
        mgr.start_conversation("Schedule the retro").unwrap();
        mgr.add_assistant_message("Done.").unwrap();
        mgr.into_thread()
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path().join("threads"));
        let t = thread("t-1");
        store.save("t-1", &t).await.unwrap();
        assert_eq!(store.load("t-1").await.unwrap(), t);
        assert!(store.exists("t-1").await.unwrap());
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path());
        store.save("t-1", &thread("t-1")).await.unwrap();
        assert!(!dir.path().join(".t-1.json.tmp").exists());
        assert!(dir.path().join("t-1.json").exists());
    }

    #[tokio::test]
    async fn missing_thread_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path());
        assert!(store.load("ghost").await.unwrap_err().is_not_found());
        assert!(!store.exists("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path());
        for bad in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                store.save(bad, &thread("t")).await,
                Err(ThreadError::Storage(_))
            ));
        }
    }

    #[tokio::test]
    async fn list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path());
        store.save("b", &thread("b")).await.unwrap();
        store.save("a", &thread("a")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn list_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path().join("nothing-here"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path());
        store.save("t", &thread("t")).await.unwrap();
        store.delete("t").await.unwrap();
        store.delete("t").await.unwrap();
        assert!(!store.exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path());
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert!(matches!(
            store.load("bad").await,
            Err(ThreadError::Serialization(_))
        ));
    }
}
