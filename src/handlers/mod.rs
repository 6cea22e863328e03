pub mod capture;
pub mod config;

pub use self::capture::*;
pub use self::config::*;

use crate::error::AppError;
use crate::{health, websocket};
use actix_web::{web, HttpRequest, HttpResponse};

/// Register every route. Shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/config", web::get().to(get_config))
            .route("/sessions", web::get().to(list_sessions))
            .route("/sessions", web::post().to(start_session))
            .route("/sessions/{id}/end", web::post().to(end_session))
            .route("/events", web::post().to(ingest_event))
            .route("/audio", web::post().to(ingest_audio)),
    )
    .route("/ws/capture", web::get().to(websocket::capture_websocket))
    .route("/health", web::get().to(health::health_check))
    .default_service(web::to(not_found));
}

/// Unmatched routes get the JSON error envelope instead of an empty 404.
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(format!(
        "No route for {} {}",
        req.method(),
        req.path()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_unknown_route_returns_error_envelope() {
        let app = test::init_service(App::new().configure(configure)).await;

        let req = test::TestRequest::get().uri("/recordings").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_found");
        assert_eq!(body["error"]["message"], "No route for GET /recordings");
    }
}
