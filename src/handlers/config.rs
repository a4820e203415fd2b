use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /api/v1/config
///
/// Effective configuration after defaults, `config.toml` and environment
/// overrides have been layered.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config,
        "pipeline": state.pipeline.name(),
        "history_persistent": state.history.is_persistent()
    })))
}
