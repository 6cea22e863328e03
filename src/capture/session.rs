//! # Capture Sessions
//!
//! A capture session owns every turn of one dialogue: one current and one
//! pending slot per direction, a holding area for pending turns that were
//! displaced before their grace timer fired, the turn id counter and the
//! raw event log.
//!
//! ## Slot Rules:
//! - A direction has at most one current and at most one pending turn.
//! - A new current turn cannot open while the direction's current slot is
//!   occupied.
//! - Data for a direction goes to the current turn first, then the pending
//!   turn, and is dropped when both are empty.

use crate::capture::events::Direction;
use crate::capture::turn::{Turn, TurnPhase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Current and pending turn for one direction.
#[derive(Debug, Default)]
pub struct TurnSlots {
    pub current: Option<Turn>,
    pub pending: Option<Turn>,
}

/// Outcome of a boundary "stopped" event.
#[derive(Debug)]
pub struct Stopped {
    /// Id of the turn now in the pending slot
    pub turn_id: u64,
    /// Older pending turn pushed out of the slot, if any
    pub displaced: Option<u64>,
}

/// All state for one live dialogue.
#[derive(Debug)]
pub struct CaptureSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Distinguishes sessions that reuse an id after the previous one ended
    pub generation: u64,
    /// Last issued turn id; the first turn gets 1
    turn_count: u64,
    input: TurnSlots,
    output: TurnSlots,
    /// Pending turns replaced before their timer fired, keyed by turn id
    displaced: BTreeMap<u64, Turn>,
    /// Ids that already went through the save procedure
    saved: HashSet<u64>,
    /// Every data event received, in arrival order
    events: Vec<serde_json::Value>,
}

impl CaptureSession {
    pub fn new(id: String, started_at: DateTime<Utc>, generation: u64) -> Self {
        Self {
            id,
            started_at,
            generation,
            turn_count: 0,
            input: TurnSlots::default(),
            output: TurnSlots::default(),
            displaced: BTreeMap::new(),
            saved: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn slots(&self, direction: Direction) -> &TurnSlots {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn slots_mut(&mut self, direction: Direction) -> &mut TurnSlots {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    /// Open a current turn. Returns the new id, or `None` when the
    /// direction already has a current turn.
    pub fn open_turn(&mut self, direction: Direction, started_at: DateTime<Utc>) -> Option<u64> {
        if self.slots(direction).current.is_some() {
            return None;
        }
        self.turn_count += 1;
        let id = self.turn_count;
        self.slots_mut(direction).current = Some(Turn::new(id, direction, started_at));
        Some(id)
    }

    /// Move the current turn to the pending slot. Returns `None` when there
    /// is no current turn for the direction.
    pub fn stop_turn(&mut self, direction: Direction) -> Option<Stopped> {
        let slots = self.slots_mut(direction);
        let turn = slots.current.take()?;
        let turn_id = turn.id;

        let displaced = slots.pending.replace(turn);
        let displaced_id = displaced.map(|old| {
            let old_id = old.id;
            self.displaced.insert(old_id, old);
            old_id
        });

        Some(Stopped {
            turn_id,
            displaced: displaced_id,
        })
    }

    /// The turn that accepts data for `direction`: current first, then pending.
    pub fn receiving_turn(&mut self, direction: Direction) -> Option<&mut Turn> {
        let slots = self.slots_mut(direction);
        match slots.current {
            Some(ref mut turn) => Some(turn),
            None => slots.pending.as_mut(),
        }
    }

    /// Take the turn a grace timer was armed for.
    ///
    /// The pending slot is cleared only if it still holds `turn_id`; a turn
    /// that was displaced in the meantime is taken from the holding area.
    pub fn take_expired(&mut self, direction: Direction, turn_id: u64) -> Option<Turn> {
        let slots = self.slots_mut(direction);
        if slots.pending.as_ref().map(|t| t.id) == Some(turn_id) {
            return slots.pending.take();
        }
        self.displaced.remove(&turn_id)
    }

    /// Empty every slot for a forced drain, in persistence order:
    /// input current, input pending, output current, output pending, then
    /// displaced turns by id.
    pub fn drain(&mut self) -> Vec<Turn> {
        let mut turns = Vec::new();
        for direction in [Direction::Input, Direction::Output] {
            let slots = self.slots_mut(direction);
            turns.extend(slots.current.take());
            turns.extend(slots.pending.take());
        }
        turns.extend(std::mem::take(&mut self.displaced).into_values());
        turns
    }

    /// Record that `turn_id` is being saved. Returns false if it already was.
    pub fn mark_saved(&mut self, turn_id: u64) -> bool {
        self.saved.insert(turn_id)
    }

    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }

    pub fn record_event(&mut self, raw: serde_json::Value) {
        self.events.push(raw);
    }

    pub fn events(&self) -> &[serde_json::Value] {
        &self.events
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut turns = Vec::new();
        for direction in [Direction::Input, Direction::Output] {
            let slots = self.slots(direction);
            if let Some(turn) = &slots.current {
                turns.push(TurnSnapshot::of(turn, TurnPhase::Current));
            }
            if let Some(turn) = &slots.pending {
                turns.push(TurnSnapshot::of(turn, TurnPhase::Pending));
            }
        }
        turns.extend(
            self.displaced
                .values()
                .map(|turn| TurnSnapshot::of(turn, TurnPhase::Pending)),
        );

        SessionSnapshot {
            id: self.id.clone(),
            started_at: self.started_at,
            turn_count: self.turn_count,
            saved_turns: self.saved.len(),
            event_count: self.events.len(),
            open_turns: turns,
        }
    }
}

/// Read-only view of a session for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub turn_count: u64,
    pub saved_turns: usize,
    pub event_count: usize,
    pub open_turns: Vec<TurnSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSnapshot {
    pub id: u64,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub phase: TurnPhase,
    pub fragment_count: usize,
    pub transcript_length: usize,
}

impl TurnSnapshot {
    fn of(turn: &Turn, phase: TurnPhase) -> Self {
        Self {
            id: turn.id,
            direction: turn.direction,
            phase,
            fragment_count: turn.fragments.len(),
            transcript_length: turn.transcript.chars().count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CaptureSession {
        CaptureSession::new("s".to_string(), Utc::now(), 0)
    }

    #[test]
    fn test_turn_ids_shared_across_directions() {
        let mut s = session();
        assert_eq!(s.open_turn(Direction::Input, Utc::now()), Some(1));
        assert_eq!(s.open_turn(Direction::Output, Utc::now()), Some(2));
        s.stop_turn(Direction::Input);
        assert_eq!(s.open_turn(Direction::Input, Utc::now()), Some(3));
        assert_eq!(s.turn_count(), 3);
    }

    #[test]
    fn test_cannot_open_second_current_turn() {
        let mut s = session();
        assert_eq!(s.open_turn(Direction::Input, Utc::now()), Some(1));
        assert_eq!(s.open_turn(Direction::Input, Utc::now()), None);
        assert_eq!(s.turn_count(), 1);
    }

    #[test]
    fn test_stop_without_current_is_ignored() {
        let mut s = session();
        assert!(s.stop_turn(Direction::Output).is_none());
    }

    #[test]
    fn test_data_prefers_current_then_pending() {
        let mut s = session();
        s.open_turn(Direction::Input, Utc::now());
        s.stop_turn(Direction::Input);
        s.receiving_turn(Direction::Input).unwrap().push_fragment("a".into());
        assert_eq!(s.slots(Direction::Input).pending.as_ref().unwrap().fragments.len(), 1);

        s.open_turn(Direction::Input, Utc::now());
        s.receiving_turn(Direction::Input).unwrap().push_fragment("b".into());
        assert_eq!(s.slots(Direction::Input).current.as_ref().unwrap().fragments, vec!["b"]);
        assert!(s.receiving_turn(Direction::Output).is_none());
    }

    #[test]
    fn test_displaced_pending_turn_is_held_for_its_timer() {
        let mut s = session();
        s.open_turn(Direction::Input, Utc::now());
        s.stop_turn(Direction::Input);
        s.open_turn(Direction::Input, Utc::now());
        let stopped = s.stop_turn(Direction::Input).unwrap();
        assert_eq!(stopped.turn_id, 2);
        assert_eq!(stopped.displaced, Some(1));

        // Stale timer for turn 1 does not clear the slot now holding turn 2
        let old = s.take_expired(Direction::Input, 1).unwrap();
        assert_eq!(old.id, 1);
        assert_eq!(s.slots(Direction::Input).pending.as_ref().unwrap().id, 2);

        assert_eq!(s.take_expired(Direction::Input, 2).unwrap().id, 2);
        assert!(s.take_expired(Direction::Input, 2).is_none());
    }

    #[test]
    fn test_drain_order() {
        let mut s = session();
        s.open_turn(Direction::Output, Utc::now()); // 1
        s.stop_turn(Direction::Output);
        s.open_turn(Direction::Input, Utc::now()); // 2
        s.stop_turn(Direction::Input);
        s.open_turn(Direction::Input, Utc::now()); // 3
        s.open_turn(Direction::Output, Utc::now()); // 4

        let ids: Vec<u64> = s.drain().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
        assert!(s.drain().is_empty());
    }

    #[test]
    fn test_mark_saved_once() {
        let mut s = session();
        assert!(s.mark_saved(7));
        assert!(!s.mark_saved(7));
        assert_eq!(s.saved_count(), 1);
    }
}
