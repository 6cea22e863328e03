//! # Turn Persistence
//!
//! The capture engine hands every finalized turn to a [`TurnStore`] as three
//! independent artifacts (audio, transcript, metadata) and every ended
//! session as a summary plus its raw event log. Each write stands alone: a
//! failed audio write must not touch a transcript that was already written.
//!
//! ## Implementations:
//! - **FsTurnStore**: one directory per session, one per turn
//! - **MemoryTurnStore** (tests): records writes and can inject failures

pub mod fs;
#[cfg(test)]
pub mod memory;

pub use fs::FsTurnStore;
#[cfg(test)]
pub use memory::MemoryTurnStore;

use crate::capture::{Direction, TurnMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one turn's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TurnKey {
    pub session_id: String,
    pub turn_id: u64,
    pub direction: Direction,
}

impl TurnKey {
    pub fn new(session_id: &str, turn_id: u64, direction: Direction) -> Self {
        Self {
            session_id: session_id.to_string(),
            turn_id,
            direction,
        }
    }

    /// Directory-friendly label, e.g. `turn-3-output`.
    pub fn label(&self) -> String {
        format!("turn-{}-{}", self.turn_id, self.direction)
    }
}

/// What is known about a session when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Client-reported duration
    pub duration: Option<f64>,
    /// Client-reported event count
    pub event_count: Option<u64>,
    /// Client-reported full transcript
    pub transcript: Option<String>,
    /// Turns opened by the server-side state machine
    pub turn_count: u64,
    /// Events actually received by the server
    pub raw_event_count: usize,
}

/// Sink for finalized turns and ended sessions.
///
/// Implementations must be overwrite-safe: writing the same key twice
/// replaces the earlier artifact instead of failing or appending.
pub trait TurnStore: Send + Sync {
    fn save_audio(&self, key: &TurnKey, bytes: &[u8]) -> anyhow::Result<()>;

    fn save_transcript(&self, key: &TurnKey, text: &str) -> anyhow::Result<()>;

    fn save_metadata(&self, key: &TurnKey, metadata: &TurnMetadata) -> anyhow::Result<()>;

    fn save_session(
        &self,
        summary: &SessionSummary,
        events: &[serde_json::Value],
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_key_label() {
        let key = TurnKey::new("abc", 3, Direction::Output);
        assert_eq!(key.label(), "turn-3-output");
    }
}
