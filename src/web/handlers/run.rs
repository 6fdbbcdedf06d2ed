// POST /api/run: run one pipeline tick now.
//
// Returns 202 Accepted with the tick report once the tick finishes.
// Returns 409 Conflict if a scheduled or manual run is already in flight.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::pipeline::TickOutcome;
use crate::web::{api_error, AppState};

pub async fn trigger_run(State(state): State<AppState>) -> Response {
    match state.pipeline.run_once().await {
        Ok(TickOutcome::Completed(report)) => (StatusCode::ACCEPTED, Json(report)).into_response(),
        Ok(TickOutcome::Suppressed) => {
            api_error(StatusCode::CONFLICT, "A pipeline run is already in flight")
        }
        Err(e) => {
            error!(error = %e, "Manual pipeline run failed");
            api_error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
    }
}
