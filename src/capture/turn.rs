//! # Turns
//!
//! A turn is one contiguous utterance on one side of the dialogue. It
//! collects base64 fragments and transcript text while it sits in a
//! session's current or pending slot, and is consumed by the save procedure
//! exactly once.

use crate::capture::events::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a live turn sits. Saved turns leave the session entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    Current,
    Pending,
}

/// One utterance being assembled.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Unique and increasing within the owning session, across both directions
    pub id: u64,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    /// Base64 fragments in arrival order
    pub fragments: Vec<String>,
    pub transcript: String,
}

impl Turn {
    pub fn new(id: u64, direction: Direction, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            direction,
            started_at,
            fragments: Vec::new(),
            transcript: String::new(),
        }
    }

    pub fn push_fragment(&mut self, data: String) {
        self.fragments.push(data);
    }

    /// Append transcript text exactly as received.
    ///
    /// Input completions and output deltas both accumulate verbatim; any
    /// spacing between completions is the sender's.
    pub fn append_transcript(&mut self, text: &str) {
        self.transcript.push_str(text);
    }

    pub fn metadata(&self, audio_bytes: Option<usize>) -> TurnMetadata {
        TurnMetadata {
            id: self.id,
            direction: self.direction,
            started_at: self.started_at,
            fragment_count: self.fragments.len(),
            transcript_length: self.transcript.chars().count(),
            audio_bytes,
        }
    }
}

/// Metadata record persisted alongside every saved turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    pub id: u64,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub fragment_count: usize,
    pub transcript_length: usize,
    /// Length of the repaired audio artifact, when one was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bytes: Option<usize>,
}
