//! # Turn Tracker
//!
//! The synchronous core of turn capture. It owns every live session, the
//! initialization segment cache and the grace-period deadlines, and it is
//! driven entirely by its callers: each method takes the current instant
//! instead of reading a clock, so tests can replay any interleaving under
//! virtual time.
//!
//! ## Routing:
//! Messages carry an optional session id. An explicit id that matches no
//! live session is dropped. A missing id falls back to the most recently
//! started live session, which is only correct when one session is live
//! at a time.
//!
//! ## Save Procedure:
//! 1. Decode and concatenate the turn's base64 fragments
//! 2. Repair the bytes with [`make_playable`] and write the audio artifact
//! 3. Write the transcript if it is not empty
//! 4. Write the metadata record (always, even for turns without audio)
//!
//! Each step fails on its own: a decode or write failure is logged and
//! counted, and the remaining artifacts are still written.

use crate::capture::events::{
    millis_to_datetime, AudioFragment, DataEvent, Direction, EventKind, SessionEnd, SessionStart,
};
use crate::capture::scheduler::DeadlineQueue;
use crate::capture::session::{CaptureSession, SessionSnapshot};
use crate::capture::turn::Turn;
use crate::capture::CaptureError;
use crate::media::webm::has_container_header;
use crate::media::{make_playable, InitSegmentCache};
use crate::store::{SessionSummary, TurnKey, TurnStore};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long a stopped turn keeps accepting late data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriods {
    /// Speech-to-text transcripts can lag the stop event by 1-2 seconds
    pub input: Duration,
    pub output: Duration,
}

impl Default for GracePeriods {
    fn default() -> Self {
        Self {
            input: Duration::from_millis(1500),
            output: Duration::from_millis(500),
        }
    }
}

impl GracePeriods {
    pub fn for_direction(&self, direction: Direction) -> Duration {
        match direction {
            Direction::Input => self.input,
            Direction::Output => self.output,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub grace: GracePeriods,
    pub max_sessions: usize,
    pub write_session_summary: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            grace: GracePeriods::default(),
            max_sessions: 32,
            write_session_summary: true,
        }
    }
}

/// Running counters since the tracker was created.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub turns_saved: u64,
    pub audio_bytes_written: u64,
    /// Messages addressed to no live session
    pub dropped_messages: u64,
    /// Audio fragments that arrived with no open turn to accept them
    pub orphan_fragments: u64,
    pub decode_failures: u64,
    pub persistence_failures: u64,
    pub rejected_commands: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub active_sessions: usize,
    pub armed_timers: usize,
    pub cached_init_segments: usize,
    pub stats: TrackerStats,
    pub sessions: Vec<SessionSnapshot>,
}

pub struct TurnTracker {
    sessions: HashMap<String, CaptureSession>,
    /// Live session ids, oldest first
    creation_order: Vec<String>,
    cache: InitSegmentCache,
    deadlines: DeadlineQueue,
    /// Next session generation
    next_generation: u64,
    options: TrackerOptions,
    store: Arc<dyn TurnStore>,
    stats: TrackerStats,
}

impl TurnTracker {
    pub fn new(options: TrackerOptions, store: Arc<dyn TurnStore>) -> Self {
        Self {
            sessions: HashMap::new(),
            creation_order: Vec::new(),
            cache: InitSegmentCache::new(),
            deadlines: DeadlineQueue::new(),
            next_generation: 0,
            options,
            store,
            stats: TrackerStats::default(),
        }
    }

    pub fn start_session(&mut self, start: SessionStart) -> Result<(), CaptureError> {
        if self.sessions.contains_key(&start.id) {
            self.stats.rejected_commands += 1;
            return Err(CaptureError::DuplicateSession(start.id));
        }
        if self.sessions.len() >= self.options.max_sessions {
            self.stats.rejected_commands += 1;
            return Err(CaptureError::SessionLimit(self.options.max_sessions));
        }

        let started_at = start
            .started_at
            .and_then(millis_to_datetime)
            .unwrap_or_else(Utc::now);

        info!(session_id = %start.id, started_at = %started_at, "Capture session started");
        let generation = self.next_generation;
        self.next_generation += 1;
        self.creation_order.push(start.id.clone());
        self.sessions.insert(
            start.id.clone(),
            CaptureSession::new(start.id, started_at, generation),
        );
        self.stats.sessions_started += 1;
        Ok(())
    }

    /// Apply a data event: boundary transitions and transcript text.
    pub fn handle_event(&mut self, event: DataEvent, now: Instant) {
        let Some(session_id) = self.resolve(event.session_id.as_deref()) else {
            self.stats.dropped_messages += 1;
            debug!(event_type = %event.event_type, "Event for unknown session dropped");
            return;
        };
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };

        match serde_json::to_value(&event) {
            Ok(raw) => session.record_event(raw),
            Err(err) => warn!(session_id = %session_id, error = %err, "Could not log raw event"),
        }

        match event.kind() {
            EventKind::Started(direction) => {
                let started_at = event.occurred_at(Utc::now());
                match session.open_turn(direction, started_at) {
                    Some(turn_id) => {
                        debug!(session_id = %session_id, turn_id, direction = %direction, "Turn opened");
                    }
                    None => {
                        debug!(session_id = %session_id, direction = %direction, "Turn already open, start ignored");
                    }
                }
            }
            EventKind::Stopped(direction) => match session.stop_turn(direction) {
                Some(stopped) => {
                    let grace = self.options.grace.for_direction(direction);
                    self.deadlines.arm(
                        now + grace,
                        &session_id,
                        session.generation,
                        direction,
                        stopped.turn_id,
                    );
                    debug!(
                        session_id = %session_id,
                        turn_id = stopped.turn_id,
                        direction = %direction,
                        grace_ms = grace.as_millis() as u64,
                        "Turn pending"
                    );
                    if let Some(old) = stopped.displaced {
                        warn!(session_id = %session_id, turn_id = old, "Pending turn displaced before its timer fired");
                    }
                }
                None => {
                    debug!(session_id = %session_id, direction = %direction, "No open turn, stop ignored");
                }
            },
            EventKind::InputTranscriptCompleted => {
                let text = event.transcript.as_deref().unwrap_or_default();
                append_transcript(session, Direction::Input, text);
            }
            EventKind::OutputTranscriptDelta => {
                let text = event.delta.as_deref().unwrap_or_default();
                append_transcript(session, Direction::Output, text);
            }
            EventKind::Other => {}
        }
    }

    /// Append an audio fragment to the direction's current-or-pending turn.
    pub fn handle_audio(&mut self, fragment: AudioFragment) {
        let Some(session_id) = self.resolve(fragment.session_id.as_deref()) else {
            self.stats.dropped_messages += 1;
            debug!(direction = %fragment.direction, "Audio for unknown session dropped");
            return;
        };
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };

        let direction = fragment.direction;
        if let Some(turn) = session.receiving_turn(direction) {
            turn.push_fragment(fragment.data);
            return;
        }

        // No turn to take it, but a header-bearing chunk still seeds the cache
        self.stats.orphan_fragments += 1;
        if !self.cache.contains(&session_id, direction) {
            if let Ok(bytes) = decode_fragment(&fragment.data) {
                if has_container_header(&bytes) {
                    self.cache.seed_from(&session_id, direction, &bytes);
                }
            }
        }
        debug!(session_id = %session_id, direction = %direction, "Audio outside any turn dropped");
    }

    /// Force-drain a session's turns, persist its summary and release it.
    pub fn end_session(&mut self, end: SessionEnd) -> Result<(), CaptureError> {
        let Some(mut session) = self.sessions.remove(&end.id) else {
            self.stats.dropped_messages += 1;
            return Err(CaptureError::UnknownSession(end.id));
        };
        self.creation_order.retain(|id| id != &end.id);
        let purged = self.deadlines.purge_session(&session.id);

        for turn in session.drain() {
            if session.mark_saved(turn.id) {
                save_turn(self.store.as_ref(), &mut self.cache, &mut self.stats, &session.id, turn);
            }
        }

        if self.options.write_session_summary {
            let summary = SessionSummary {
                id: session.id.clone(),
                started_at: session.started_at,
                ended_at: Utc::now(),
                duration: end.duration,
                event_count: end.event_count,
                transcript: end.transcript,
                turn_count: session.turn_count(),
                raw_event_count: session.events().len(),
            };
            if let Err(err) = self.store.save_session(&summary, session.events()) {
                self.stats.persistence_failures += 1;
                error!(session_id = %session.id, error = %err, "Failed to persist session summary");
            }
        }

        let evicted = self.cache.evict_session(&session.id);
        self.stats.sessions_ended += 1;
        info!(
            session_id = %session.id,
            turns = session.turn_count(),
            saved = session.saved_count(),
            evicted_segments = evicted,
            purged_timers = purged,
            "Capture session ended"
        );
        Ok(())
    }

    /// End every live session, oldest first.
    pub fn drain_all(&mut self) {
        for id in self.creation_order.clone() {
            let end = SessionEnd {
                id,
                ..SessionEnd::default()
            };
            if let Err(err) = self.end_session(end) {
                warn!(error = %err, "Drain skipped session");
            }
        }
    }

    /// Persist every turn whose grace period has elapsed at `now`.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let mut saved = 0;
        while let Some(deadline) = self.deadlines.pop_due(now) {
            let Some(session) = self.sessions.get_mut(&deadline.session_id) else {
                debug!(session_id = %deadline.session_id, turn_id = deadline.turn_id, "Timer for ended session ignored");
                continue;
            };
            if session.generation != deadline.generation {
                debug!(session_id = %deadline.session_id, turn_id = deadline.turn_id, "Timer for earlier session with this id ignored");
                continue;
            }
            let Some(turn) = session.take_expired(deadline.direction, deadline.turn_id) else {
                continue;
            };
            if !session.mark_saved(turn.id) {
                continue;
            }
            save_turn(
                self.store.as_ref(),
                &mut self.cache,
                &mut self.stats,
                &deadline.session_id,
                turn,
            );
            saved += 1;
        }
        saved
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.next_due()
    }

    pub fn session(&self, session_id: &str) -> Option<&CaptureSession> {
        self.sessions.get(session_id)
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let sessions = self
            .creation_order
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(CaptureSession::snapshot)
            .collect();

        TrackerSnapshot {
            active_sessions: self.sessions.len(),
            armed_timers: self.deadlines.len(),
            cached_init_segments: self.cache.len(),
            stats: self.stats.clone(),
            sessions,
        }
    }

    fn resolve(&self, explicit: Option<&str>) -> Option<String> {
        match explicit {
            Some(id) if self.sessions.contains_key(id) => Some(id.to_string()),
            Some(_) => None,
            None => self.creation_order.last().cloned(),
        }
    }
}

fn append_transcript(session: &mut CaptureSession, direction: Direction, text: &str) {
    match session.receiving_turn(direction) {
        Some(turn) => turn.append_transcript(text),
        None => debug!(session_id = %session.id, direction = %direction, "Transcript outside any turn dropped"),
    }
}

/// Decode one transport-encoded fragment, tolerating a `data:` URL prefix.
pub fn decode_fragment(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(strip_data_url(data))
}

/// Decode and concatenate a turn's fragments in order.
pub fn decode_fragments(fragments: &[String]) -> Result<Vec<u8>, CaptureError> {
    let mut raw = Vec::new();
    for (index, fragment) in fragments.iter().enumerate() {
        STANDARD
            .decode_vec(strip_data_url(fragment), &mut raw)
            .map_err(|err| CaptureError::MalformedFragment {
                index,
                reason: err.to_string(),
            })?;
    }
    Ok(raw)
}

fn strip_data_url(data: &str) -> &str {
    match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,").map_or(data, |(_, payload)| payload),
        None => data,
    }
}

fn save_turn(
    store: &dyn TurnStore,
    cache: &mut InitSegmentCache,
    stats: &mut TrackerStats,
    session_id: &str,
    turn: Turn,
) {
    let key = TurnKey::new(session_id, turn.id, turn.direction);
    let mut audio_bytes = None;

    if !turn.fragments.is_empty() {
        match decode_fragments(&turn.fragments) {
            Ok(raw) => {
                let playable = make_playable(cache, session_id, turn.direction, raw);
                match store.save_audio(&key, &playable) {
                    Ok(()) => {
                        stats.audio_bytes_written += playable.len() as u64;
                        audio_bytes = Some(playable.len());
                    }
                    Err(err) => {
                        stats.persistence_failures += 1;
                        error!(session_id = %session_id, turn_id = turn.id, error = %err, "Failed to persist turn audio");
                    }
                }
            }
            Err(err) => {
                stats.decode_failures += 1;
                warn!(session_id = %session_id, turn_id = turn.id, error = %err, "Turn audio skipped");
            }
        }
    }

    if !turn.transcript.is_empty() {
        if let Err(err) = store.save_transcript(&key, &turn.transcript) {
            stats.persistence_failures += 1;
            error!(session_id = %session_id, turn_id = turn.id, error = %err, "Failed to persist turn transcript");
        }
    }

    let metadata = turn.metadata(audio_bytes);
    if let Err(err) = store.save_metadata(&key, &metadata) {
        stats.persistence_failures += 1;
        error!(session_id = %session_id, turn_id = turn.id, error = %err, "Failed to persist turn metadata");
    }

    stats.turns_saved += 1;
    info!(
        session_id = %session_id,
        turn_id = turn.id,
        direction = %turn.direction,
        fragments = metadata.fragment_count,
        transcript_chars = metadata.transcript_length,
        audio_bytes = audio_bytes.unwrap_or(0),
        "Turn saved"
    );
}
