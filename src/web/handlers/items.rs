// Content item handlers.
//
// GET /api/items?limit=  : recent items with analyzed/flagged state
// GET /api/items/{id}    : one item with attachments, comment thread, verdicts
//
// Attachments are inlined as data: URIs so a browser can render them
// without a second endpoint.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::db::models::{AttachedFile, ContentKind};
use crate::db::thread::build_thread;
use crate::web::{api_error, AppState};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

impl LimitParams {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
struct FileView {
    id: i64,
    display_name: String,
    stored_name: String,
    mime_type: String,
    size: usize,
    data_uri: String,
}

impl From<&AttachedFile> for FileView {
    fn from(f: &AttachedFile) -> Self {
        Self {
            id: f.id,
            display_name: f.display_name.clone(),
            stored_name: f.stored_name.clone(),
            mime_type: f.mime_type.clone(),
            size: f.payload.len(),
            data_uri: format!("data:{};base64,{}", f.mime_type, STANDARD.encode(&f.payload)),
        }
    }
}

pub async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Response {
    match state.store.list_items(params.limit()).await {
        Ok(items) => Json(serde_json::json!({
            "count": items.len(),
            "items": items,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

pub async fn get_item(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let item = match state.store.get_item(id).await {
        Ok(Some(item)) => item,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, &format!("Item {id} not found")),
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let files = match state.store.files_for(id).await {
        Ok(files) => files,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let thread = if item.kind == ContentKind::Article {
        match state.store.comments_for_article(id).await {
            Ok(comments) => build_thread(comments),
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    } else {
        Vec::new()
    };

    let results = match state.store.results_for(id).await {
        Ok(results) => results,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let files: Vec<FileView> = files.iter().map(FileView::from).collect();

    Json(serde_json::json!({
        "item": item,
        "files": files,
        "thread": thread,
        "results": results,
    }))
    .into_response()
}
