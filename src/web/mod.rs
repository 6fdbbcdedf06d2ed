// Web server: Axum-based admin API over the pipeline and the store.
//
// The API only reaches the core through `Pipeline::run_once()` and the
// ContentStore read methods. Access control is left to the deployment
// (bind address, reverse proxy); there is no session layer here.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::ContentStore;
use crate::pipeline::Pipeline;

pub mod handlers;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ContentStore>,
    pub pipeline: Arc<Pipeline>,
}

/// Start the Axum web server and run until `shutdown` resolves.
pub async fn run_server(
    state: AppState,
    bind: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("Vigil admin API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/run", post(handlers::run::trigger_run))
        .route("/api/status", get(handlers::status::get_status))
        .route("/api/items", get(handlers::items::list_items))
        .route("/api/items/{id}", get(handlers::items::get_item))
        .route("/api/results", get(handlers::results::list_results))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness check, always 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::classify::{ImageClassifier, ImageVerdict, TextClassifier, TextVerdict};
    use crate::db::models::{ContentKind, NewAttachedFile, NewContentItem};
    use crate::db::sqlite::SqliteStore;
    use crate::pipeline::PipelineConfig;

    struct Clean;

    #[async_trait]
    impl TextClassifier for Clean {
        async fn classify_text(&self, _body: &str) -> crate::error::Result<TextVerdict> {
            Ok(TextVerdict {
                contains_profanity: false,
                confidence: 0.0,
            })
        }

        fn name(&self) -> &str {
            "clean"
        }
    }

    #[async_trait]
    impl ImageClassifier for Clean {
        async fn classify_image(&self, _p: &[u8], _m: &str) -> crate::error::Result<ImageVerdict> {
            Ok(ImageVerdict {
                is_nsfw: false,
                confidence: 0.0,
            })
        }

        fn name(&self) -> &str {
            "clean"
        }
    }

    fn state() -> AppState {
        let store: Arc<dyn ContentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            Arc::new(Clean),
            Arc::new(Clean),
            PipelineConfig::default(),
        ));
        AppState { store, pipeline }
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn article_with_comment_and_image(store: &dyn ContentStore) -> i64 {
        let article = store
            .insert_item(&NewContentItem {
                kind: ContentKind::Article,
                title: Some("Hello".to_string()),
                body: "<p>first post</p>".to_string(),
                author_ref: "alice".to_string(),
                article_id: None,
                parent_id: None,
            })
            .await
            .unwrap();
        store
            .insert_item(&NewContentItem {
                kind: ContentKind::Comment,
                title: None,
                body: "nice".to_string(),
                author_ref: "bob".to_string(),
                article_id: Some(article),
                parent_id: None,
            })
            .await
            .unwrap();
        store
            .attach_file(&NewAttachedFile {
                owner_content_id: article,
                display_name: "dot.png".to_string(),
                stored_name: "a1b2.png".to_string(),
                payload: b"abc".to_vec(),
                mime_type: "image/png".to_string(),
            })
            .await
            .unwrap();
        article
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(build_router(state()), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_run_then_status_and_results() {
        let state = state();
        let id = article_with_comment_and_image(&*state.store).await;
        let app = build_router(state);

        let (status, report) = call(app.clone(), "POST", "/api/run").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(report["analyzed"], 2);

        let (status, body) = call(app.clone(), "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["in_flight"], false);
        assert_eq!(body["phase"]["phase"], "idle");
        assert_eq!(body["counts"]["analyzed"], 2);
        assert_eq!(body["last_tick"]["analyzed"], 2);

        let (_, body) = call(app.clone(), "GET", "/api/results?limit=1").await;
        assert_eq!(body["count"], 1);

        let (_, body) = call(app, "GET", &format!("/api/items/{id}")).await;
        assert_eq!(body["item"]["analyzed"], true);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_item_detail_inlines_files_and_thread() {
        let state = state();
        let id = article_with_comment_and_image(&*state.store).await;
        let app = build_router(state);

        let (status, body) = call(app.clone(), "GET", &format!("/api/items/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"][0]["data_uri"], "data:image/png;base64,YWJj");
        assert_eq!(body["thread"][0]["comment"]["author_ref"], "bob");

        let (_, body) = call(app, "GET", "/api/items?limit=10").await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_unknown_item_is_404() {
        let (status, body) = call(build_router(state()), "GET", "/api/items/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("999"));
    }
}
