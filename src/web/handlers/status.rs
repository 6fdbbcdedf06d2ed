// GET /api/status: pipeline phase plus queue counts.
//
// Combines the live pipeline state with store-derived counts and the last
// tick summary so a dashboard needs a single round-trip.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::pipeline::run::{LAST_TICK_AT, LAST_TICK_SUMMARY};
use crate::web::{api_error, AppState};

pub async fn get_status(State(state): State<AppState>) -> Response {
    let counts = match state.store.counts().await {
        Ok(c) => c,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let last_tick_at = state.store.get_state(LAST_TICK_AT).await.ok().flatten();
    let last_tick = state
        .store
        .get_state(LAST_TICK_SUMMARY)
        .await
        .ok()
        .flatten()
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok());

    Json(serde_json::json!({
        "phase": state.pipeline.phase(),
        "in_flight": state.pipeline.is_running(),
        "counts": counts,
        "last_tick_at": last_tick_at,
        "last_tick": last_tick,
    }))
    .into_response()
}
