use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the effective configuration after layering.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "capture": {
                "input_grace_ms": config.capture.input_grace_ms,
                "output_grace_ms": config.capture.output_grace_ms,
                "max_concurrent_sessions": config.capture.max_concurrent_sessions,
                "command_buffer": config.capture.command_buffer
            },
            "storage": {
                "output_dir": config.storage.output_dir,
                "write_session_summary": config.storage.write_session_summary
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureHandle;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_config() {
        let (handle, _rx) = CaptureHandle::detached(1);
        let state = AppState::new(AppConfig::default(), handle);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["capture"]["input_grace_ms"], 1500);
        assert_eq!(body["config"]["storage"]["output_dir"], "recordings");
    }
}
