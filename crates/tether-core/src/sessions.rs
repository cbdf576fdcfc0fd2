//! Session storage.
//!
//! [`SessionStore`] caches active sessions in memory and persists them as
//! JSONL files: a metadata header line followed by one line per message.
//! Writes are atomic -- content goes to a `.tmp` file which is renamed
//! over the target, with the previous file kept as `.bak`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tether_types::error::{ErrorCode, Result, TetherError};
use tether_types::message::Message;
use tether_types::session::Session;

/// Durable session storage with an in-memory write-through cache.
pub struct SessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
    // Per-session write locks so concurrent appends to one session
    // serialize while different sessions proceed in parallel.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The directory session files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get an existing session or create a new empty one.
    ///
    /// Checks the cache, then disk, then creates.
    pub async fn get_or_create(&self, key: &str) -> Result<Session> {
        validate_key(key)?;

        {
            let cache = self.cache.lock().await;
            if let Some(session) = cache.get(key) {
                return Ok(session.clone());
            }
        }

        if let Some(session) = self.load(key).await? {
            let mut cache = self.cache.lock().await;
            cache.insert(key.to_string(), session.clone());
            return Ok(session);
        }

        let session = Session::new(key);
        self.cache
            .lock()
            .await
            .insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Append messages to a session and persist it durably.
    ///
    /// Returns the updated session. The write completes before this
    /// returns, so callers may acknowledge the turn afterwards.
    pub async fn append(&self, key: &str, messages: Vec<Message>) -> Result<Session> {
        validate_key(key)?;
        let lock = self.session_lock(key).await;
        let _guard = lock.lock().await;

        let mut session = self.get_or_create(key).await?;
        session.append(messages);
        self.persist(&session).await?;

        self.cache
            .lock()
            .await
            .insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Persist a session snapshot (atomic rename, previous file to `.bak`).
    pub async fn save(&self, session: &Session) -> Result<()> {
        validate_key(&session.key)?;
        let lock = self.session_lock(&session.key).await;
        let _guard = lock.lock().await;

        self.persist(session).await?;
        self.cache
            .lock()
            .await
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    /// Delete a session from memory and disk.
    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.cache.lock().await.remove(key);

        let path = self.session_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let _ = tokio::fs::remove_file(backup_path(&path)).await;
        debug!(key, "session deleted");
        Ok(())
    }

    /// List all session keys found on disk.
    ///
    /// The key is read from each file's metadata header; unreadable files
    /// are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            match read_header_key(&path).await {
                Some(key) => keys.push(key),
                None => warn!(path = %path.display(), "skipping session file without header"),
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Load a session from disk, `None` when no file exists.
    async fn load(&self, key: &str) -> Result<Option<Session>> {
        let path = self.session_path(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut lines = content.lines();
        let header_line = lines.next().ok_or_else(|| {
            TetherError::new(ErrorCode::SessionCorrupted, "session file is empty")
                .with_context("key", key)
        })?;
        let header: serde_json::Value = serde_json::from_str(header_line)?;

        let created_at = header
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Utc::now);
        let updated_at = header
            .get("updated_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Utc::now);
        let metadata = header
            .get("metadata")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let mut messages = Vec::new();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(trimmed) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    warn!(key, error = %e, "skipping malformed message line");
                }
            }
        }

        debug!(key, messages = messages.len(), "loaded session from disk");

        Ok(Some(Session {
            key: key.to_string(),
            messages,
            created_at,
            updated_at,
            metadata,
        }))
    }

    /// Write the full session file: tmp, backup, rename.
    async fn persist(&self, session: &Session) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.session_path(&session.key);

        let header = serde_json::json!({
            "_type": "metadata",
            "key": session.key,
            "created_at": session.created_at.to_rfc3339(),
            "updated_at": session.updated_at.to_rfc3339(),
            "metadata": session.metadata,
        });

        let mut content = serde_json::to_string(&header)?;
        content.push('\n');
        for msg in &session.messages {
            content.push_str(&serde_json::to_string(msg)?);
            content.push('\n');
        }

        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, &content).await?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::copy(&path, backup_path(&path)).await;
        }
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key = %session.key, messages = session.messages.len(), "session persisted");
        Ok(())
    }

    async fn session_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sanitize_key(key)))
    }
}

fn backup_path(path: &Path) -> PathBuf {
    path.with_extension("jsonl.bak")
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TetherError::invalid_input("session key must not be empty"));
    }
    if key.contains("..") || key.contains('/') || key.contains('\\') {
        return Err(TetherError::invalid_input(format!(
            "session key contains path characters: {key}"
        )));
    }
    Ok(())
}

async fn read_header_key(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let first = content.lines().next()?;
    let header: serde_json::Value = serde_json::from_str(first).ok()?;
    header
        .get("key")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
