//! HTTP routes and handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use modgate_core::Error;
use modgate_engine::ImageJob;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/v1/moderate", post(moderate))
        .route("/v1/moderate/text", post(moderate_text))
        .route("/v1/moderate/image", post(moderate_image))
        .route("/v1/moderate/images", post(moderate_images))
        .route("/v1/admin/badwords", post(add_bad_word))
        .route("/v1/admin/badwords", get(list_bad_words))
        .route("/v1/admin/badwords/:word", delete(remove_bad_word))
        .route("/v1/admin/rebuild", post(rebuild_filters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

#[derive(Debug, Deserialize)]
struct ModerateRequest {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    image_urls: Vec<String>,
    #[serde(default)]
    audio_urls: Vec<String>,
    #[serde(default)]
    video_urls: Vec<String>,
}

async fn moderate(
    State(state): State<AppState>,
    Json(req): Json<ModerateRequest>,
) -> impl IntoResponse {
    metrics::counter!("modgate_requests_total", "kind" => "mixed").increment(1);
    let request_id = request_id(req.request_id);
    let result = state
        .engine
        .moderate(
            &request_id,
            &req.content,
            &req.image_urls,
            &req.audio_urls,
            &req.video_urls,
        )
        .await;
    respond(result)
}

#[derive(Debug, Deserialize)]
struct ModerateTextRequest {
    #[serde(default)]
    request_id: Option<String>,
    content: String,
}

async fn moderate_text(
    State(state): State<AppState>,
    Json(req): Json<ModerateTextRequest>,
) -> impl IntoResponse {
    metrics::counter!("modgate_requests_total", "kind" => "text").increment(1);
    let request_id = request_id(req.request_id);
    respond(state.engine.moderate_text(&request_id, &req.content).await)
}

#[derive(Debug, Deserialize)]
struct ModerateImageRequest {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    owner_id: String,
    url: String,
    #[serde(default)]
    file_hash: Option<String>,
}

async fn moderate_image(
    State(state): State<AppState>,
    Json(req): Json<ModerateImageRequest>,
) -> impl IntoResponse {
    metrics::counter!("modgate_requests_total", "kind" => "image").increment(1);
    let request_id = request_id(req.request_id);
    respond(
        state
            .engine
            .moderate_image(&request_id, &req.owner_id, &req.url, req.file_hash.as_deref())
            .await,
    )
}

#[derive(Debug, Deserialize)]
struct ModerateImagesRequest {
    jobs: Vec<ImageJobRequest>,
}

#[derive(Debug, Deserialize)]
struct ImageJobRequest {
    url: String,
    #[serde(default)]
    file_hash: Option<String>,
}

async fn moderate_images(
    State(state): State<AppState>,
    Json(req): Json<ModerateImagesRequest>,
) -> impl IntoResponse {
    metrics::counter!("modgate_requests_total", "kind" => "image_batch").increment(1);
    let jobs = req
        .jobs
        .into_iter()
        .map(|j| ImageJob {
            url: j.url,
            file_hash: j.file_hash,
        })
        .collect();
    let results = state.engine.moderate_images(jobs).await;
    Json(serde_json::json!({ "results": results }))
}

#[derive(Debug, Deserialize)]
struct AddBadWordRequest {
    word: String,
    category: String,
    nsfw_score: f64,
    #[serde(default)]
    added_by: Option<String>,
    #[serde(default)]
    model_version: Option<String>,
}

async fn add_bad_word(
    State(state): State<AppState>,
    Json(req): Json<AddBadWordRequest>,
) -> impl IntoResponse {
    let result = state
        .engine
        .add_bad_word(
            &req.word,
            &req.category,
            req.nsfw_score,
            req.added_by.as_deref(),
            req.model_version.as_deref(),
        )
        .await;
    match result {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "added" }))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_bad_word(
    State(state): State<AppState>,
    Path(word): Path<String>,
) -> impl IntoResponse {
    match state.engine.remove_bad_word(&word).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "removed" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListBadWordsQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_bad_words(
    State(state): State<AppState>,
    Query(query): Query<ListBadWordsQuery>,
) -> impl IntoResponse {
    let result = state
        .engine
        .list_bad_words(query.category.as_deref(), query.limit, query.offset)
        .await;
    match result {
        Ok((words, total)) => Json(serde_json::json!({
            "words": words,
            "total": total,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn rebuild_filters(State(state): State<AppState>) -> impl IntoResponse {
    let words = match state.engine.rebuild_filters().await {
        Ok(count) => count,
        Err(e) => return error_response(e),
    };
    let phashes = match state.engine.rebuild_image_filters().await {
        Ok(count) => count,
        Err(e) => return error_response(e),
    };
    Json(serde_json::json!({ "words": words, "phashes": phashes })).into_response()
}

fn request_id(provided: Option<String>) -> String {
    provided.unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn respond<T: serde::Serialize>(result: modgate_core::Result<T>) -> axum::response::Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(error: Error) -> axum::response::Response {
    metrics::counter!("modgate_errors_total").increment(1);
    let status = match &error {
        Error::ImageUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Cancelled => StatusCode::REQUEST_TIMEOUT,
        Error::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
