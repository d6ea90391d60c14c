//! Conversation turns and append-only transcript stores.
//!
//! Stored transcripts are consumed later by report and feedback generation,
//! so only accepted user and persona turns are ever written here. Corrective
//! directives have no representation in this module.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageResult;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The clinician practicing the conversation.
    User,
    /// The roleplayed patient.
    Persona,
}

/// A single turn in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said.
    pub text: String,
    /// Position in the session, starting at 1.
    pub sequence: u64,
    /// Unix milliseconds.
    pub timestamp_ms: u64,
}

impl Turn {
    /// Create a turn stamped with the current time.
    #[must_use]
    pub fn new(speaker: Speaker, text: impl Into<String>, sequence: u64) -> Self {
        Self {
            speaker,
            text: text.into(),
            sequence,
            timestamp_ms: timestamp_ms(),
        }
    }

    /// Create a user turn.
    #[must_use]
    pub fn user(text: impl Into<String>, sequence: u64) -> Self {
        Self::new(Speaker::User, text, sequence)
    }

    /// Create a persona turn.
    #[must_use]
    pub fn persona(text: impl Into<String>, sequence: u64) -> Self {
        Self::new(Speaker::Persona, text, sequence)
    }
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Append-only sink for accepted turns.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Append `turns` to the transcript of `session_id`, in order.
    async fn append(&self, session_id: &str, turns: &[Turn]) -> StorageResult<()>;

    /// Load the full transcript of `session_id`; empty if unknown.
    async fn load(&self, session_id: &str) -> StorageResult<Vec<Turn>>;

    /// List session ids with a stored transcript.
    async fn session_ids(&self) -> StorageResult<Vec<String>>;
}

/// In-memory transcript store.
#[derive(Debug, Default)]
pub struct MemoryTranscriptStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl MemoryTranscriptStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn append(&self, session_id: &str, turns: &[Turn]) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_owned())
            .or_default()
            .extend_from_slice(turns);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> StorageResult<Vec<Turn>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn session_ids(&self) -> StorageResult<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }
}

/// File-based transcript store.
///
/// Each session is a JSON-lines file named after its id.
#[derive(Debug)]
pub struct FileTranscriptStore {
    base_path: PathBuf,
}

impl FileTranscriptStore {
    /// Create a store writing into `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        let safe_id = session_id.replace([':', '/', '\\'], "_");
        self.base_path.join(format!("{safe_id}.jsonl"))
    }
}

#[async_trait]
impl TranscriptStore for FileTranscriptStore {
    async fn append(&self, session_id: &str, turns: &[Turn]) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;

        let mut buf = Vec::new();
        for turn in turns {
            serde_json::to_writer(&mut buf, turn)?;
            buf.push(b'\n');
        }

        let path = self.session_path(session_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        debug!(session = %session_id, turns = turns.len(), "appended transcript");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> StorageResult<Vec<Turn>> {
        let path = self.session_path(session_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    async fn session_ids(&self) -> StorageResult<Vec<String>> {
        if !tokio::fs::try_exists(&self.base_path).await? {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl")
                && let Some(stem) = path.file_stem()
            {
                ids.push(stem.to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryTranscriptStore::new();
        store
            .append("s1", &[Turn::user("Hello", 1), Turn::persona("Hi.", 2)])
            .await
            .unwrap();
        store.append("s1", &[Turn::user("How are you?", 3)]).await.unwrap();

        let turns = store.load("s1").await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].sequence, 3);
        assert!(store.load("unknown").await.unwrap().is_empty());
        assert_eq!(store.session_ids().await.unwrap(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTranscriptStore::new(dir.path().join("transcripts"));
        assert!(store.session_ids().await.unwrap().is_empty());

        store
            .append("abc", &[Turn::user("Hello", 1), Turn::persona("Hi there.", 2)])
            .await
            .unwrap();
        store.append("abc", &[Turn::user("Bye", 3)]).await.unwrap();

        let turns = store.load("abc").await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].speaker, Speaker::Persona);
        assert_eq!(turns[1].text, "Hi there.");
        assert_eq!(store.session_ids().await.unwrap(), vec!["abc"]);
        assert!(store.load("other").await.unwrap().is_empty());
    }

    #[test]
    fn test_turn_constructors() {
        let turn = Turn::user("Hello", 1);
        assert_eq!(turn.speaker, Speaker::User);
        assert!(turn.timestamp_ms > 0);
    }
}
