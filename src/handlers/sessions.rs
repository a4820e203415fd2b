use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /api/v1/sessions
pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let sessions = &state.sessions;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active": sessions.active_count(),
        "max": sessions.max_sessions(),
        "by_state": sessions.state_counts(),
        "sessions": sessions.snapshots()
    }))
}

/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    match state.sessions.get(&session_id) {
        Some(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        None => Err(AppError::NotFound(format!("no live session {}", session_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSession;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_lists_live_sessions() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        let id = state.sessions.register().unwrap();
        let mut session = AudioSession::new(id.clone(), 1024);
        session.accept_chunk(&[0u8; 64]).unwrap();
        state.sessions.update(&session);

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/v1/sessions", web::get().to(list_sessions)),
        )
        .await;

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/v1/sessions").to_request(),
        )
        .await;

        assert_eq!(body["active"], 1);
        assert_eq!(body["max"], 10);
        assert_eq!(body["by_state"]["open"], 1);
        assert_eq!(body["sessions"][0]["session_id"], id);
        assert_eq!(body["sessions"][0]["bytes_received"], 64);
        assert_eq!(body["sessions"][0]["state"], "open");
    }

    #[actix_web::test]
    async fn test_get_single_session() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        let id = state.sessions.register().unwrap();

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/v1/sessions/{session_id}", web::get().to(get_session)),
        )
        .await;

        let uri = format!("/api/v1/sessions/{}", id);
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(body["session_id"], id);
        assert_eq!(body["chunks_received"], 0);

        state.sessions.remove(&id);
        let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
