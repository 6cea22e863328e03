//! # Health Checks
//!
//! Liveness plus a summary of the capture loop. The capture figures come
//! from a snapshot taken inside the loop, so a health check also proves the
//! loop is still answering.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /health` and `GET /api/v1/health`
///
/// Reports `degraded` with 503 when the capture loop cannot be reached.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let service = json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "host": config.server.host,
        "port": config.server.port
    });

    let snapshot = match state.capture.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            return HttpResponse::ServiceUnavailable().json(json!({
                "status": "degraded",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "uptime_seconds": uptime_seconds,
                "service": service,
                "capture": { "available": false, "reason": err.to_string() }
            }));
        }
    };

    let session_usage = if config.capture.max_concurrent_sessions > 0 {
        snapshot.active_sessions as f64 / config.capture.max_concurrent_sessions as f64
    } else {
        0.0
    };
    let load = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": service,
        "capture": {
            "available": true,
            "load": load,
            "active_sessions": snapshot.active_sessions,
            "max_sessions": config.capture.max_concurrent_sessions,
            "session_usage_percent": (session_usage * 100.0).round(),
            "armed_timers": snapshot.armed_timers,
            "cached_init_segments": snapshot.cached_init_segments,
            "websocket_connections": state.active_connections(),
            "stats": snapshot.stats
        },
        "storage": {
            "output_dir": config.storage.output_dir
        },
        "memory": get_memory_info()
    }))
}

/// Process memory from `/proc` where available.
fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;
            for line in status.lines() {
                let kb = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0)
                        * 1024
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = kb();
                } else if line.starts_with("VmSize:") {
                    vm_size = kb();
                }
            }
            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}
