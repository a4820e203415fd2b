//! `GET /history` and `POST /clear`, the two calls the recorder UI makes.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Number of entries wanted; defaults to `history.default_limit`
    pub limit: Option<usize>,
}

/// GET /history
///
/// Returns a JSON array of summary strings. Order follows
/// `history.newest_first` (newest first by default).
pub async fn get_history(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> AppResult<HttpResponse> {
    let config = &state.get_config().history;
    let limit = query.limit.unwrap_or(config.default_limit);
    if limit == 0 {
        return Err(AppError::BadRequest("limit must be greater than 0".to_string()));
    }

    let mut entries = state.history.list_recent(limit)?;
    if config.newest_first {
        entries.reverse();
    }

    Ok(HttpResponse::Ok().json(entries))
}

/// POST /clear
///
/// Wipes the whole history store, regardless of which sessions are live.
pub async fn clear_history(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    // File removal happens under the store lock; keep it off the worker thread.
    let history = state.history.clone();
    let removed = web::block(move || history.clear())
        .await
        .map_err(|err| AppError::Internal(format!("clear task failed: {}", err)))??;
    info!(removed, "History cleared");

    Ok(HttpResponse::Ok().json(json!({
        "status": "cleared",
        "removed": removed
    })))
}
