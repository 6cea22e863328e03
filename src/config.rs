//! # Configuration Management
//!
//! Layered settings for the capture server, loaded with the `config` crate.
//!
//! ## Sources (highest priority first):
//! 1. `APP_`-prefixed environment variables, sections split by `__`
//!    (e.g. `APP_CAPTURE__INPUT_GRACE_MS=2000`)
//! 2. `HOST` / `PORT` environment variables
//! 3. An optional `config.toml` in the working directory
//! 4. The defaults below
//!
//! `.env` files are applied to the process environment before loading.

use crate::capture::{GracePeriods, TrackerOptions};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Turn capture tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Grace period after a user turn stops; transcription lags the audio
    pub input_grace_ms: u64,
    /// Grace period after an assistant turn stops
    pub output_grace_ms: u64,
    pub max_concurrent_sessions: usize,
    /// Capacity of the queue between transport handlers and the capture loop
    pub command_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for session and turn artifacts
    pub output_dir: String,
    /// Persist `session.json` and `events.jsonl` when a session ends
    pub write_session_summary: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            capture: CaptureConfig {
                input_grace_ms: 1500,
                output_grace_ms: 500,
                max_concurrent_sessions: 32,
                command_buffer: 1024,
            },
            storage: StorageConfig {
                output_dir: "recordings".to_string(),
                write_session_summary: true,
            },
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(env::vars().collect())
    }

    /// Layer the sources over an explicit set of environment variables.
    fn load_from(vars: config::Map<String, String>) -> Result<Self> {
        let mut bare = config::Map::new();
        for (name, key) in [("HOST", "SERVER__HOST"), ("PORT", "SERVER__PORT")] {
            if let Some(value) = vars.get(name) {
                bare.insert(key.to_string(), value.clone());
            }
        }

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").source(Some(bare)))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .source(Some(vars)),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.capture.input_grace_ms == 0 || self.capture.output_grace_ms == 0 {
            return Err(anyhow::anyhow!("Grace periods must be greater than 0"));
        }
        if self.capture.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }
        if self.capture.command_buffer == 0 {
            return Err(anyhow::anyhow!("Command buffer must be greater than 0"));
        }
        if self.storage.output_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Storage output directory cannot be empty"));
        }
        Ok(())
    }

    pub fn grace_periods(&self) -> GracePeriods {
        GracePeriods {
            input: Duration::from_millis(self.capture.input_grace_ms),
            output: Duration::from_millis(self.capture.output_grace_ms),
        }
    }

    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            grace: self.grace_periods(),
            max_sessions: self.capture.max_concurrent_sessions,
            write_session_summary: self.storage.write_session_summary,
        }
    }
}
