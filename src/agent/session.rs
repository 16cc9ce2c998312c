//! Session memory
//!
//! Maps a thread id to the ordered turns of that conversation. The store is
//! behind a trait so the in-memory default can be swapped for the file
//! backed store without touching the loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::agent::loop_state::Turn;
use crate::core::{AnalystError, Result};

/// Keyed conversational memory
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, creating it when the id is absent or unknown.
    /// Returns the id actually used together with the prior turns.
    async fn get_or_create(&self, thread_id: Option<&str>) -> Result<(String, Vec<Turn>)>;

    /// Append a completed turn to a session
    async fn append(&self, thread_id: &str, turn: Turn) -> Result<()>;

    /// Turns of a session; empty when the session does not exist
    async fn history(&self, thread_id: &str) -> Result<Vec<Turn>>;

    /// Whether sessions survive a restart
    fn is_persistent(&self) -> bool;
}

/// Generate a fresh thread id
pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, thread_id: Option<&str>) -> Result<(String, Vec<Turn>)> {
        let id = thread_id.map(str::to_string).unwrap_or_else(new_thread_id);
        let mut sessions = self.sessions.write().await;
        let turns = sessions.entry(id.clone()).or_default().clone();
        Ok((id, turns))
    }

    async fn append(&self, thread_id: &str, turn: Turn) -> Result<()> {
        self.sessions
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Turn>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// On-disk layout of one session
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    thread_id: String,
    turns: Vec<Turn>,
}

/// Session store writing one JSON document per thread under a directory
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AnalystError::session(format!("Cannot create {}: {}", dir.display(), e))
        })?;
        tracing::debug!(dir = %dir.display(), "Opened file session store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf> {
        if !is_safe_id(thread_id) {
            return Err(AnalystError::session(format!(
                "Invalid thread id '{}': only letters, digits, '-' and '_' are allowed",
                thread_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", thread_id)))
    }

    async fn read(&self, thread_id: &str) -> Result<Option<Vec<Turn>>> {
        let path = self.path_for(thread_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let file: SessionFile = serde_json::from_str(&content).map_err(|e| {
                    AnalystError::session(format!("Corrupt session file {}: {}", path.display(), e))
                })?;
                Ok(Some(file.turns))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AnalystError::session(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write(&self, thread_id: &str, turns: Vec<Turn>) -> Result<()> {
        let path = self.path_for(thread_id)?;
        let file = SessionFile {
            thread_id: thread_id.to_string(),
            turns,
        };
        let content = serde_json::to_string_pretty(&file)?;

        // Write then rename so a crash never leaves a half-written session
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(|e| {
            AnalystError::session(format!("Cannot write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            AnalystError::session(format!("Cannot write {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_or_create(&self, thread_id: Option<&str>) -> Result<(String, Vec<Turn>)> {
        let id = thread_id.map(str::to_string).unwrap_or_else(new_thread_id);
        let _guard = self.write_lock.lock().await;

        match self.read(&id).await? {
            Some(turns) => Ok((id, turns)),
            None => {
                self.write(&id, Vec::new()).await?;
                tracing::debug!(thread_id = %id, "Created session file");
                Ok((id, Vec::new()))
            }
        }
    }

    async fn append(&self, thread_id: &str, turn: Turn) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut turns = self.read(thread_id).await?.unwrap_or_default();
        turns.push(turn);
        self.write(thread_id, turns).await
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Turn>> {
        Ok(self.read(thread_id).await?.unwrap_or_default())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Per-thread locks serializing turns of the same conversation.
///
/// `tokio::sync::Mutex` queues waiters in FIFO order, so turns run in the
/// order they arrived. Different threads never contend. Entries nobody holds
/// or waits on are dropped on the next `acquire`.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a thread
    pub async fn acquire(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Holders and waiters keep a clone; the map alone means idle
            locks.retain(|id, lock| id == thread_id || Arc::strong_count(lock) > 1);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of threads with a live lock entry
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::loop_state::{AgentLoopState, ModelProposal, TurnOutcome};

    fn turn(question: &str, answer: &str) -> Turn {
        let mut state = AgentLoopState::new(question, 5);
        state.record_proposal(ModelProposal::FinalAnswer(answer.to_string()));
        state.into_turn(TurnOutcome::Answered)
    }

    #[tokio::test]
    async fn test_memory_store_creates_and_appends() {
        let store = InMemorySessionStore::new();
        let (id, turns) = store.get_or_create(None).await.unwrap();
        assert!(turns.is_empty());
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        store.append(&id, turn("q1", "a1")).await.unwrap();
        let (same, turns) = store.get_or_create(Some(&id)).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].answer, "a1");
    }

    #[tokio::test]
    async fn test_memory_store_unknown_id_creates() {
        let store = InMemorySessionStore::new();
        let (id, turns) = store.get_or_create(Some("custom")).await.unwrap();
        assert_eq!(id, "custom");
        assert!(turns.is_empty());
        assert_eq!(store.len().await, 1);
        assert!(!store.is_persistent());
    }

    #[tokio::test]
    async fn test_history_of_missing_session_is_empty() {
        let store = InMemorySessionStore::new();
        assert!(store.history("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let (id, _) = store.get_or_create(None).await.unwrap();
        store.append(&id, turn("q1", "a1")).await.unwrap();
        store.append(&id, turn("q2", "a2")).await.unwrap();
        assert!(store.is_persistent());

        let reopened = FileSessionStore::open(dir.path()).await.unwrap();
        let history = reopened.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].question, "q2");
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let err = store.get_or_create(Some("../etc/passwd")).await.unwrap_err();
        assert!(matches!(err, AnalystError::SessionStore(_)));
    }

    #[tokio::test]
    async fn test_locks_serialize_same_thread() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire("t").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire("t").await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // A different thread is not blocked
        let _free = locks.acquire("u").await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_locks_are_dropped() {
        let locks = SessionLocks::new();
        for id in ["a", "b", "c"] {
            let _guard = locks.acquire(id).await;
        }
        assert_eq!(locks.tracked().await, 1);

        let held = locks.acquire("d").await;
        let _other = locks.acquire("e").await;
        assert_eq!(locks.tracked().await, 2);

        drop(held);
        let _again = locks.acquire("d").await;
        assert_eq!(locks.tracked().await, 2);
    }
}
