//! # Capture Service
//!
//! Runs the [`TurnTracker`] on a single tokio task. Transport handlers never
//! touch tracker state: they enqueue [`CaptureCommand`]s through a cloneable
//! [`CaptureHandle`] and return immediately.
//!
//! ## Scheduling Loop:
//! The task waits on whichever comes first, the next command or the
//! earliest grace deadline. Due deadlines are always fired before a command
//! is applied, so a message that arrives after a turn's grace period has
//! elapsed never reaches that turn, even if both became ready together.
//!
//! ## Backpressure:
//! The command queue is bounded. A full queue is reported to the caller as
//! [`AppError::ServiceUnavailable`] instead of blocking the HTTP worker.

use crate::capture::events::{AudioFragment, DataEvent, SessionEnd, SessionStart};
use crate::capture::tracker::{TrackerSnapshot, TrackerStats, TurnTracker};
use crate::error::{AppError, AppResult};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Everything the capture loop can be asked to do.
#[derive(Debug)]
pub enum CaptureCommand {
    Start(SessionStart),
    Event(DataEvent),
    Audio(AudioFragment),
    End(SessionEnd),
    Snapshot(oneshot::Sender<TrackerSnapshot>),
    /// Drain every live session and stop the loop
    Shutdown,
}

impl CaptureCommand {
    fn name(&self) -> &'static str {
        match self {
            CaptureCommand::Start(_) => "start",
            CaptureCommand::Event(_) => "event",
            CaptureCommand::Audio(_) => "audio",
            CaptureCommand::End(_) => "end",
            CaptureCommand::Snapshot(_) => "snapshot",
            CaptureCommand::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureHandle {
    tx: mpsc::Sender<CaptureCommand>,
}

impl CaptureHandle {
    /// A handle whose queue nobody drains, for exercising backpressure.
    #[cfg(test)]
    pub(crate) fn detached(buffer: usize) -> (Self, mpsc::Receiver<CaptureCommand>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Enqueue without waiting.
    pub fn submit(&self, command: CaptureCommand) -> AppResult<()> {
        self.tx.try_send(command).map_err(|err| match err {
            TrySendError::Full(command) => {
                warn!(command = command.name(), "Capture queue full, rejecting command");
                AppError::ServiceUnavailable("Capture queue is full, retry shortly".to_string())
            }
            TrySendError::Closed(_) => {
                AppError::ServiceUnavailable("Capture service has stopped".to_string())
            }
        })
    }

    pub fn start_session(&self, start: SessionStart) -> AppResult<()> {
        self.submit(CaptureCommand::Start(start))
    }

    pub fn send_event(&self, event: DataEvent) -> AppResult<()> {
        self.submit(CaptureCommand::Event(event))
    }

    pub fn send_audio(&self, fragment: AudioFragment) -> AppResult<()> {
        self.submit(CaptureCommand::Audio(fragment))
    }

    pub fn end_session(&self, end: SessionEnd) -> AppResult<()> {
        self.submit(CaptureCommand::End(end))
    }

    /// Ask the loop for a consistent view of all live sessions.
    pub async fn snapshot(&self) -> AppResult<TrackerSnapshot> {
        let (reply, response) = oneshot::channel();
        self.submit(CaptureCommand::Snapshot(reply))?;
        response
            .await
            .map_err(|_| AppError::Internal("Capture service dropped snapshot request".to_string()))
    }

    /// Request a drain-and-stop. Waits for queue space so it is never lost.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.tx
            .send(CaptureCommand::Shutdown)
            .await
            .map_err(|_| AppError::ServiceUnavailable("Capture service has stopped".to_string()))
    }
}

/// Spawn the capture loop. The join handle yields the final counters once
/// every session has been drained.
pub fn spawn_capture_service(
    tracker: TurnTracker,
    buffer: usize,
) -> (CaptureHandle, JoinHandle<TrackerStats>) {
    let (tx, rx) = mpsc::channel(buffer);
    let task = tokio::spawn(run(tracker, rx));
    (CaptureHandle { tx }, task)
}

async fn run(mut tracker: TurnTracker, mut rx: mpsc::Receiver<CaptureCommand>) -> TrackerStats {
    info!("Capture service started");

    loop {
        let next_deadline = tracker.next_deadline();
        // select! evaluates disabled branches too, so give it some instant
        let wake_at = next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("All capture handles dropped");
                    break;
                };
                tracker.fire_due(Instant::now());
                if !apply(&mut tracker, command) {
                    break;
                }
            }
            _ = sleep_until(wake_at), if next_deadline.is_some() => {
                tracker.fire_due(Instant::now());
            }
        }
    }

    tracker.drain_all();
    let stats = tracker.stats().clone();
    info!(
        sessions = stats.sessions_ended,
        turns = stats.turns_saved,
        failures = stats.persistence_failures,
        "Capture service stopped"
    );
    stats
}

/// Returns false when the loop should stop.
fn apply(tracker: &mut TurnTracker, command: CaptureCommand) -> bool {
    match command {
        CaptureCommand::Start(start) => {
            if let Err(err) = tracker.start_session(start) {
                warn!(error = %err, "Session start rejected");
            }
        }
        CaptureCommand::Event(event) => tracker.handle_event(event, Instant::now()),
        CaptureCommand::Audio(fragment) => tracker.handle_audio(fragment),
        CaptureCommand::End(end) => {
            if let Err(err) = tracker.end_session(end) {
                warn!(error = %err, "Session end ignored");
            }
        }
        CaptureCommand::Snapshot(reply) => {
            // The requester may have given up waiting
            let _ = reply.send(tracker.snapshot());
        }
        CaptureCommand::Shutdown => {
            info!("Capture shutdown requested");
            return false;
        }
    }
    true
}
