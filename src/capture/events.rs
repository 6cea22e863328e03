//! # Inbound Capture Messages
//!
//! Wire types for the four message categories the capture client sends:
//! session start, data events, audio fragments and session end. Field names
//! are camelCase on the wire; timestamps are milliseconds since the Unix
//! epoch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the dialogue a turn or fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// User speech (microphone)
    Input,
    /// Assistant speech (playback)
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session start signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub id: String,
    /// Milliseconds since the Unix epoch; server time when absent
    pub started_at: Option<i64>,
}

/// Session end signal. Everything except the id is client-reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnd {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub event_count: Option<u64>,
    #[serde(default)]
    pub transcript: Option<String>,
}

/// One base64 audio fragment captured from a recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFragment {
    pub direction: Direction,
    /// Base64 encoded container bytes
    pub data: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A realtime dialogue event as observed on the client.
///
/// Only a handful of `type` values drive turn tracking (see [`EventKind`]);
/// the full event, unknown fields included, is kept in the session's raw
/// event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DataEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::classify(&self.event_type)
    }

    /// Event time, or `fallback` when the client sent none.
    pub fn occurred_at(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp.and_then(millis_to_datetime).unwrap_or(fallback)
    }
}

/// The event types the turn state machine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Boundary: a turn begins in the given direction
    Started(Direction),
    /// Boundary: the current turn in the given direction ends
    Stopped(Direction),
    /// Final user speech transcript
    InputTranscriptCompleted,
    /// Streaming assistant transcript fragment
    OutputTranscriptDelta,
    /// Logged only
    Other,
}

impl EventKind {
    pub const SPEECH_STARTED: &'static str = "input_audio_buffer.speech_started";
    pub const SPEECH_STOPPED: &'static str = "input_audio_buffer.speech_stopped";
    pub const OUTPUT_STARTED: &'static str = "output_audio_buffer.started";
    pub const OUTPUT_STOPPED: &'static str = "output_audio_buffer.stopped";
    pub const INPUT_TRANSCRIPT_COMPLETED: &'static str =
        "conversation.item.input_audio_transcription.completed";
    pub const OUTPUT_TRANSCRIPT_DELTA: &'static str = "response.output_audio_transcript.delta";

    pub fn classify(event_type: &str) -> Self {
        match event_type {
            Self::SPEECH_STARTED => EventKind::Started(Direction::Input),
            Self::SPEECH_STOPPED => EventKind::Stopped(Direction::Input),
            Self::OUTPUT_STARTED => EventKind::Started(Direction::Output),
            Self::OUTPUT_STOPPED => EventKind::Stopped(Direction::Output),
            Self::INPUT_TRANSCRIPT_COMPLETED => EventKind::InputTranscriptCompleted,
            Self::OUTPUT_TRANSCRIPT_DELTA => EventKind::OutputTranscriptDelta,
            _ => EventKind::Other,
        }
    }
}

pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
