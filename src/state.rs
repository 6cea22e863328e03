//! # Application State
//!
//! Shared, cheaply cloneable state handed to every actix worker through
//! `web::Data`. Nothing here is capture state: turns and sessions live in
//! the capture loop and are reached through [`CaptureHandle`].

use crate::capture::CaptureHandle;
use crate::config::AppConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub capture: CaptureHandle,
    /// Open WebSocket ingestion streams
    pub ws_connections: Arc<AtomicUsize>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, capture: CaptureHandle) -> Self {
        Self {
            config: Arc::new(config),
            capture,
            ws_connections: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.as_ref().clone()
    }

    pub fn connection_opened(&self) -> usize {
        self.ws_connections.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn connection_closed(&self) -> usize {
        let previous = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn active_connections(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
