//! Request handlers for the web interface.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use super::templates::{self, Notice};
use super::AppState;
use crate::services::{AnnotateError, UploadedFile};

/// Name of the multipart field carrying uploaded images.
const UPLOAD_FIELD: &str = "files";

/// Redirect to `path` with a one-shot notice in the query string.
fn redirect_with(path: &str, kind: &str, msg: &str) -> Response {
    let location = format!("{}?kind={}&msg={}", path, kind, urlencoding::encode(msg));
    Redirect::to(&location).into_response()
}

fn error_page(err: &AnnotateError) -> Response {
    tracing::error!("Request failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(templates::error_page(&err.to_string())),
    )
        .into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Dashboard with progress and entry points into the workflow.
pub async fn dashboard(State(state): State<AppState>, Query(notice): Query<Notice>) -> Response {
    let stats = match state.service.stats().await {
        Ok(stats) => stats,
        Err(e) => return error_page(&e),
    };
    Html(templates::dashboard(&stats, &notice)).into_response()
}

pub async fn upload_form(Query(notice): Query<Notice>) -> Html<String> {
    Html(templates::upload_form(&notice))
}

/// Accept one or more images from the `files` field.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Malformed upload: {}", e);
                return redirect_with("/upload", "error", &format!("Upload failed: {}", e));
            }
        };

        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            continue;
        }
        match field.bytes().await {
            Ok(bytes) => files.push(UploadedFile::new(filename, bytes)),
            Err(e) => {
                tracing::warn!(filename = %filename, "Failed to read upload: {}", e);
                return redirect_with("/upload", "error", &format!("Upload failed: {}", e));
            }
        }
    }

    if files.is_empty() {
        return redirect_with("/upload", "error", "No files selected");
    }

    let report = state.service.accept_uploads(files).await;
    let problems: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();

    match report.first_id() {
        Some(first_id) => {
            let mut msg = format!(
                "Successfully uploaded {} image(s)!",
                report.uploaded.len()
            );
            for problem in &problems {
                msg.push_str(" | ");
                msg.push_str(problem);
            }
            let kind = if problems.is_empty() { "success" } else { "warning" };
            redirect_with(&format!("/extract/{}", first_id), kind, &msg)
        }
        None => {
            let msg = if problems.is_empty() {
                "No valid images were uploaded".to_string()
            } else {
                problems.join(" | ")
            };
            redirect_with("/upload", "error", &msg)
        }
    }
}

/// Annotation page for one image.
pub async fn extract_form(
    State(state): State<AppState>,
    Path(image_id): Path<i32>,
    Query(notice): Query<Notice>,
) -> Response {
    match state.service.annotation_target(image_id).await {
        Ok(target) => Html(templates::extract_page(&target, &notice)).into_response(),
        Err(AnnotateError::NotFound(_)) => redirect_with("/", "error", "Image not found"),
        Err(e) => error_page(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExtractForm {
    #[serde(default)]
    text_content: String,
}

/// Save a transcription and move on to the next image in the queue.
pub async fn extract_submit(
    State(state): State<AppState>,
    Path(image_id): Path<i32>,
    Form(form): Form<ExtractForm>,
) -> Response {
    let has_more = match state.service.submit_text(image_id, &form.text_content).await {
        Ok(has_more) => has_more,
        Err(AnnotateError::EmptyText) => {
            return redirect_with(
                &format!("/extract/{}", image_id),
                "error",
                "Please enter some text",
            )
        }
        Err(AnnotateError::NotFound(_)) => {
            return redirect_with("/", "error", "Image not found");
        }
        Err(e) => {
            tracing::error!(image_id, "Failed to save text: {}", e);
            return redirect_with(
                &format!("/extract/{}", image_id),
                "error",
                &format!("Error saving text: {}", e),
            );
        }
    };

    let saved = "Text extracted and saved successfully!";
    if !has_more {
        return redirect_with("/", "success", saved);
    }
    match state.service.next_for_annotation().await {
        Ok(Some(next)) => redirect_with(&format!("/extract/{}", next.id), "success", saved),
        Ok(None) => redirect_with("/", "success", saved),
        Err(e) => error_page(&e),
    }
}

/// Jump to the oldest unprocessed image.
pub async fn batch(State(state): State<AppState>) -> Response {
    match state.service.next_for_annotation().await {
        Ok(Some(next)) => Redirect::to(&format!("/extract/{}", next.id)).into_response(),
        Ok(None) => redirect_with("/", "info", "All images have been processed!"),
        Err(e) => error_page(&e),
    }
}

pub async fn admin_tools(Query(notice): Query<Notice>) -> Html<String> {
    Html(templates::admin_tools(&notice))
}

/// Every image with its transcription, newest first.
pub async fn all_images(State(state): State<AppState>, Query(notice): Query<Notice>) -> Response {
    match state.service.catalog().await {
        Ok(entries) => Html(templates::all_images(&entries, &notice)).into_response(),
        Err(e) => error_page(&e),
    }
}

pub async fn delete_image(State(state): State<AppState>, Path(image_id): Path<i32>) -> Response {
    match state.service.delete_image(image_id).await {
        Ok(_) => redirect_with("/admin/images", "success", "Image deleted successfully!"),
        Err(e) => {
            tracing::error!(image_id, "Failed to delete image: {}", e);
            redirect_with(
                "/admin/images",
                "error",
                &format!("Error deleting image: {}", e),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

/// Substring search over transcriptions.
pub async fn api_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    match state.service.search(&params.q).await {
        Ok(results) => {
            let count = results.len();
            Json(json!({ "results": results, "count": count })).into_response()
        }
        Err(AnnotateError::EmptyQuery) => {
            json_error(StatusCode::BAD_REQUEST, "Please enter a search term")
        }
        Err(e) => {
            tracing::error!("Search failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Progress counters as JSON.
pub async fn api_stats(State(state): State<AppState>) -> Response {
    match state.service.stats().await {
        Ok(stats) => Json(json!({
            "total_images": stats.total_images,
            "processed_images": stats.processed_images,
            "remaining": stats.remaining(),
            "percent_complete": stats.percent_complete(),
            "state": crate::models::QueueState::from_stats(&stats).as_str(),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Stats query failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Serve an object from the in-memory backend.
pub async fn stored_object(
    State(state): State<AppState>,
    Path((container, key)): Path<(String, String)>,
) -> Response {
    let storage = state.service.storage();
    if container != storage.container() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match storage.get(&key).await {
        Ok(bytes) => {
            let content_type = mime_guess::from_path(&key).first_or_octet_stream();
            ([(header::CONTENT_TYPE, content_type.to_string())], bytes).into_response()
        }
        Err(e) if e.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(key = %key, "Failed to read stored object: {}", e);
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn stylesheet() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        templates::CSS,
    )
}
