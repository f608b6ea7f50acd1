//! Write-through session store over a directory of JSON records.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::{fs, sync::Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{now_millis, ChatSession, Message},
};

const RECORD_EXT: &str = "json";

/// Central store handle. Share it behind an `Arc`.
pub struct ChatSessionStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, ChatSession>>,
    /// Held across the persist step so writers to one session never
    /// interleave; other sessions are unaffected.
    write_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChatSessionStore {
    /// Create `dir` if needed and load every session record in it.
    /// Unreadable or corrupt records are skipped with a warning.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(StoreError::io(&dir))?;

        let sessions = Self::load_all(&dir).await?;
        info!(dir = %dir.display(), sessions = sessions.len(), "chat store opened");

        Ok(Self {
            dir,
            sessions: RwLock::new(sessions),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    async fn load_all(dir: &Path) -> Result<HashMap<String, ChatSession>, StoreError> {
        let mut sessions = HashMap::new();
        let mut entries = fs::read_dir(dir).await.map_err(StoreError::io(dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::io(dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match Self::load_record(&path).await {
                Ok(session) => {
                    sessions.insert(session.id.clone(), session);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable session record");
                }
            }
        }
        Ok(sessions)
    }

    async fn load_record(path: &Path) -> Result<ChatSession, StoreError> {
        let bytes = fs::read(path).await.map_err(StoreError::io(path))?;
        let session: ChatSession = serde_json::from_slice(&bytes)?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != session.id {
            return Err(StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("record id {:?} does not match file name", session.id),
            });
        }
        Ok(session)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.{RECORD_EXT}"))
    }

    fn write_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.write_locks
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Rewrite the full record: temp file first, then rename over the old one.
    async fn persist(&self, session: &ChatSession) -> Result<(), StoreError> {
        let path = self.record_path(&session.id);
        let tmp = self.dir.join(format!(".{}.{RECORD_EXT}.tmp", session.id));
        let data = serde_json::to_vec_pretty(session)?;
        let written = match fs::write(&tmp, &data).await {
            Ok(()) => fs::rename(&tmp, &path).await.map_err(StoreError::io(&path)),
            Err(err) => Err(StoreError::io(&tmp)(err)),
        };
        if let Err(err) = written {
            // Best effort; the temp file may never have been created.
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }
        debug!(session_id = %session.id, bytes = data.len(), "session persisted");
        Ok(())
    }

    /// Allocate and persist an empty session for `participants`.
    pub async fn create_session<I, S>(&self, participants: I) -> Result<String, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = Uuid::new_v4().to_string();
        let session = ChatSession::new(id.clone(), participants.into_iter().map(Into::into).collect());

        let lock = self.write_lock(&id);
        let _guard = lock.lock().await;
        self.persist(&session).await?;
        self.sessions.write().insert(id.clone(), session);

        info!(session_id = %id, "session created");
        Ok(id)
    }

    /// Append `message` and persist the session before returning. The
    /// in-memory log only changes once the record is on disk.
    pub async fn append_message(&self, session_id: &str, message: Message) -> Result<(), StoreError> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }

        let lock = self.write_lock(session_id);
        let _guard = lock.lock().await;

        let mut updated = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        updated.messages.push(message);
        updated.last_updated = now_millis();

        self.persist(&updated).await?;
        self.sessions.write().insert(session_id.to_string(), updated);
        Ok(())
    }

    /// Ordered messages of a session; empty for unknown ids.
    pub fn get_messages(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    pub fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Snapshot of all sessions, in no particular order.
    pub fn list_sessions(&self) -> Vec<ChatSession> {
        self.sessions.read().values().cloned().collect()
    }

    /// The session whose participant set is exactly `participants`.
    pub fn find_session(&self, participants: &BTreeSet<String>) -> Option<String> {
        self.sessions
            .read()
            .values()
            .find(|s| &s.participants == participants)
            .map(|s| s.id.clone())
    }
}
