// GET /api/results: recent analysis results, newest first.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::items::LimitParams;
use crate::web::{api_error, AppState};

pub async fn list_results(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Response {
    match state.store.recent_results(params.limit()).await {
        Ok(results) => Json(serde_json::json!({
            "count": results.len(),
            "results": results,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
