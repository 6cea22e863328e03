//! # Turn Capture
//!
//! Reconstructs self-contained audio + transcript turns from the live,
//! out-of-order stream a realtime voice client produces.
//!
//! ## Key Components:
//! - **events**: wire types for session start/end, data events, audio fragments
//! - **turn**: one utterance and its persisted metadata record
//! - **session**: per-dialogue turn slots, turn counter and raw event log
//! - **scheduler**: grace-period deadlines as a min-heap
//! - **tracker**: the synchronous turn state machine and save procedure
//! - **service**: the tokio task that owns the tracker and drives its timers
//!
//! ## Turn Lifecycle:
//! idle → current (started event) → pending (stopped event, grace timer
//! armed) → saved (timer fired or session ended)

pub mod events;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod tracker;
pub mod turn;

pub use events::{AudioFragment, DataEvent, Direction, EventKind, SessionEnd, SessionStart};
pub use service::{spawn_capture_service, CaptureCommand, CaptureHandle};
pub use tracker::{GracePeriods, TrackerOptions, TrackerSnapshot, TrackerStats, TurnTracker};
pub use turn::{Turn, TurnMetadata};

use std::fmt;

/// Rejections produced while applying capture commands.
///
/// None of these stop the capture loop; they are logged and counted.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// A session with this id is already live
    DuplicateSession(String),

    /// The configured number of concurrent sessions is reached
    SessionLimit(usize),

    /// No live session matches the id (or no session is live at all)
    UnknownSession(String),

    /// A fragment is not valid base64
    MalformedFragment { index: usize, reason: String },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DuplicateSession(id) => write!(f, "Session '{}' already exists", id),
            CaptureError::SessionLimit(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
            CaptureError::UnknownSession(id) => write!(f, "Unknown session '{}'", id),
            CaptureError::MalformedFragment { index, reason } => {
                write!(f, "Audio fragment {} is not valid base64: {}", index, reason)
            }
        }
    }
}

impl std::error::Error for CaptureError {}
