//! # WebSocket Ingestion
//!
//! A single long-lived connection per client that carries the same four
//! messages as the HTTP routes. Each text frame is an envelope:
//!
//! ```json
//! { "kind": "event", "payload": { "type": "input_audio_buffer.speech_started", "sessionId": "S" } }
//! ```
//!
//! with `kind` one of `session_start`, `event`, `audio` or `session_end`.
//! Valid frames are enqueued for the capture loop without a reply; invalid
//! frames and a full queue are answered with an `error` frame and the
//! connection stays open.
//!
//! ## Heartbeat:
//! The server pings every 30 seconds and drops connections silent for 60.
//! Closing the socket does not end the sessions started over it; they live
//! until an explicit `session_end` or server shutdown.

use crate::capture::{AudioFragment, CaptureCommand, CaptureHandle, DataEvent, SessionEnd, SessionStart};
use crate::error::{AppError, AppResult};
use crate::handlers::capture::{validate_audio, validate_end, validate_event, validate_start};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames accepted from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    SessionStart(SessionStart),
    Event(DataEvent),
    Audio(AudioFragment),
    SessionEnd(SessionEnd),
}

impl ClientFrame {
    /// Validate and turn the frame into a capture command.
    pub fn into_command(self) -> AppResult<CaptureCommand> {
        match self {
            ClientFrame::SessionStart(start) => {
                validate_start(&start)?;
                Ok(CaptureCommand::Start(start))
            }
            ClientFrame::Event(event) => {
                validate_event(&event)?;
                Ok(CaptureCommand::Event(event))
            }
            ClientFrame::Audio(fragment) => {
                validate_audio(&fragment)?;
                Ok(CaptureCommand::Audio(fragment))
            }
            ClientFrame::SessionEnd(end) => {
                validate_end(&end)?;
                Ok(CaptureCommand::End(end))
            }
        }
    }
}

/// Frames sent to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready { connection_id: String },
    Error { code: String, message: String },
    Ping { timestamp: i64 },
}

pub struct CaptureWebSocket {
    id: Uuid,
    state: web::Data<AppState>,
    capture: CaptureHandle,
    /// Sessions started and not yet ended over this connection
    sessions: HashSet<String>,
    last_heartbeat: Instant,
}

impl CaptureWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            capture: state.capture.clone(),
            state,
            sessions: HashSet::new(),
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, frame: &ServerFrame) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(connection_id = %self.id, error = %err, "Failed to encode frame"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(connection_id = %self.id, code, "WebSocket error: {}", message);
        self.send(
            ctx,
            &ServerFrame::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.send_error(ctx, "invalid_frame", &format!("Invalid frame: {}", err));
                return;
            }
        };

        let command = match frame.into_command() {
            Ok(command) => command,
            Err(err) => {
                self.send_error(ctx, err.kind(), &err.to_string());
                return;
            }
        };

        let lifecycle = match &command {
            CaptureCommand::Start(start) => Some((true, start.id.clone())),
            CaptureCommand::End(end) => Some((false, end.id.clone())),
            _ => None,
        };

        if let Err(err) = self.capture.submit(command) {
            let code = match err {
                AppError::ServiceUnavailable(_) => "queue_full",
                _ => err.kind(),
            };
            self.send_error(ctx, code, &err.to_string());
            return;
        }

        match lifecycle {
            Some((true, id)) => {
                self.sessions.insert(id);
            }
            Some((false, id)) => {
                self.sessions.remove(&id);
            }
            None => {}
        }
    }
}

impl Actor for CaptureWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let open = self.state.connection_opened();
        info!(connection_id = %self.id, open_connections = open, "WebSocket connection started");
        self.send(
            ctx,
            &ServerFrame::Ready {
                connection_id: self.id.to_string(),
            },
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
            act.send(
                ctx,
                &ServerFrame::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            );
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let open = self.state.connection_closed();
        if !self.sessions.is_empty() {
            warn!(
                connection_id = %self.id,
                sessions = ?self.sessions,
                "WebSocket closed with sessions still open"
            );
        }
        info!(connection_id = %self.id, open_connections = open, "WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CaptureWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                debug!(connection_id = %self.id, bytes = data.len(), "Binary frame rejected");
                self.send_error(
                    ctx,
                    "unsupported_frame",
                    "Binary frames are not supported; send base64 audio in an audio frame",
                );
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/capture`
pub async fn capture_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());
    ws::start(CaptureWebSocket::new(state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Direction;

    #[test]
    fn test_client_frames_parse() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"kind":"session_start","payload":{"id":"S","startedAt":1700000000000}}"#,
        )
        .unwrap();
        assert!(matches!(frame, ClientFrame::SessionStart(ref s) if s.id == "S"));

        let frame: ClientFrame = serde_json::from_str(
            r#"{"kind":"audio","payload":{"direction":"output","data":"AAEC","sessionId":"S"}}"#,
        )
        .unwrap();
        match frame.into_command().unwrap() {
            CaptureCommand::Audio(fragment) => assert_eq!(fragment.direction, Direction::Output),
            other => panic!("unexpected command: {:?}", other),
        }

        let frame: ClientFrame = serde_json::from_str(
            r#"{"kind":"event","payload":{"type":"output_audio_buffer.stopped","extra":1}}"#,
        )
        .unwrap();
        assert!(matches!(frame.into_command().unwrap(), CaptureCommand::Event(_)));
    }

    #[test]
    fn test_invalid_frames_are_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"kind":"teleport","payload":{}}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"payload":{"id":"S"}}"#).is_err());

        let empty_end: ClientFrame =
            serde_json::from_str(r#"{"kind":"session_end","payload":{}}"#).unwrap();
        assert!(matches!(empty_end.into_command(), Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_server_frames_are_tagged() {
        let json = serde_json::to_value(ServerFrame::Error {
            code: "queue_full".into(),
            message: "busy".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["code"], "queue_full");
    }
}
