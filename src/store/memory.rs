//! In-memory store for tests.

use crate::capture::TurnMetadata;
use crate::store::{SessionSummary, TurnKey, TurnStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct StoredTurn {
    pub audio: Option<Vec<u8>>,
    pub transcript: Option<String>,
    pub metadata: Option<TurnMetadata>,
}

#[derive(Debug, Default)]
struct Inner {
    turns: HashMap<TurnKey, StoredTurn>,
    /// Keys in the order their metadata was written
    order: Vec<TurnKey>,
    sessions: Vec<(SessionSummary, Vec<serde_json::Value>)>,
    fail_audio: bool,
    audio_writes: usize,
}

/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryTurnStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent audio write fail.
    pub fn fail_audio_writes(&self) {
        self.inner.lock().unwrap().fail_audio = true;
    }

    pub fn turn(&self, session_id: &str, turn_id: u64) -> Option<StoredTurn> {
        let inner = self.inner.lock().unwrap();
        inner
            .turns
            .iter()
            .find(|(key, _)| key.session_id == session_id && key.turn_id == turn_id)
            .map(|(_, turn)| turn.clone())
    }

    /// Metadata of every saved turn, in save order.
    pub fn saved(&self) -> Vec<(TurnKey, TurnMetadata)> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|key| {
                let meta = inner.turns.get(key)?.metadata.clone()?;
                Some((key.clone(), meta))
            })
            .collect()
    }

    pub fn sessions(&self) -> Vec<(SessionSummary, Vec<serde_json::Value>)> {
        self.inner.lock().unwrap().sessions.clone()
    }

    pub fn audio_writes(&self) -> usize {
        self.inner.lock().unwrap().audio_writes
    }
}

impl TurnStore for MemoryTurnStore {
    fn save_audio(&self, key: &TurnKey, bytes: &[u8]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_audio {
            anyhow::bail!("audio write refused for {}", key.label());
        }
        inner.audio_writes += 1;
        inner.turns.entry(key.clone()).or_default().audio = Some(bytes.to_vec());
        Ok(())
    }

    fn save_transcript(&self, key: &TurnKey, text: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.turns.entry(key.clone()).or_default().transcript = Some(text.to_string());
        Ok(())
    }

    fn save_metadata(&self, key: &TurnKey, metadata: &TurnMetadata) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.turns.entry(key.clone()).or_default().metadata = Some(metadata.clone());
        if !inner.order.contains(key) {
            inner.order.push(key.clone());
        }
        Ok(())
    }

    fn save_session(
        &self,
        summary: &SessionSummary,
        events: &[serde_json::Value],
    ) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .push((summary.clone(), events.to_vec()));
        Ok(())
    }
}
