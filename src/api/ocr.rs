use anyhow::anyhow;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::api::{task_status_response, with_prefix, ApiError, ApiResult, ResultField};
use crate::models::TaskResponse;
use crate::services::backend::BackendClient;
use crate::services::processor::{process_invoice, TempUpload};
use crate::services::task_queue::TaskQueue;
use crate::services::text_extraction::TextRecognizer;

pub const INVALID_FILE_TYPE: &str = "Invalid file type. Only PDF, JPEG, and PNG are supported.";

// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct OcrState {
    pub queue: TaskQueue,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub upload_dir: PathBuf,
    pub max_file_size: usize,
    pub api_prefix: String,
    pub backend: Option<BackendClient>,
}

pub fn build_router(state: OcrState) -> Router {
    let api = Router::new()
        .route("/process-invoice", post(upload_invoice))
        .route("/task/:task_id", get(task_result))
        .route("/invoices/callback/:invoice_id", post(invoice_callback));

    Router::new()
        .route("/health", get(health))
        .merge(with_prefix(&state.api_prefix, api))
        .layer(DefaultBodyLimit::max(state.max_file_size + MULTIPART_OVERHEAD))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "ocr" }))
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "application/pdf" => Some("pdf"),
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

async fn upload_invoice(State(state): State<OcrState>, mut multipart: Multipart) -> ApiResult<Json<TaskResponse>> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let extension = field
            .content_type()
            .and_then(extension_for)
            .ok_or_else(|| ApiError::BadRequest(INVALID_FILE_TYPE.to_string()))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((extension, bytes));
        break;
    }

    let (extension, bytes) = upload.ok_or_else(|| ApiError::BadRequest("Missing file field".to_string()))?;
    if bytes.len() > state.max_file_size {
        return Err(ApiError::PayloadTooLarge(format!(
            "File exceeds the maximum size of {} bytes",
            state.max_file_size
        )));
    }

    let path = state
        .upload_dir
        .join(format!("{}.{}", uuid::Uuid::new_v4(), extension));
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        error!(path = %path.display(), error = %e, "Could not store upload");
        ApiError::internal("Error processing invoice", e)
    })?;
    info!(path = %path.display(), bytes = bytes.len(), "Upload stored");

    let upload = TempUpload::new(path.clone());
    let recognizer = state.recognizer.clone();
    let payload = path.display().to_string();
    let task_id = state
        .queue
        .submit("ocr", Some(payload.as_str()), async move {
            tokio::task::spawn_blocking(move || process_invoice(upload, &*recognizer))
                .await
                .map_err(|e| anyhow!("OCR worker stopped: {}", e))?
        })
        .map_err(|e| {
            error!(error = %e, "Error processing invoice");
            ApiError::internal("Error processing invoice", e)
        })?;

    Ok(Json(TaskResponse::processing(&task_id, "Invoice is being processed")))
}

async fn task_result(State(state): State<OcrState>, Path(task_id): Path<String>) -> ApiResult<Json<TaskResponse>> {
    let record = state
        .queue
        .status(&task_id)
        .map_err(|e| {
            error!(task_id = %task_id, error = %e, "Error checking task status");
            ApiError::internal("Error checking task status", e)
        })?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task_id)))?;

    Ok(Json(task_status_response(record, ResultField::Data)))
}

async fn invoice_callback(
    State(state): State<OcrState>,
    Path(invoice_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(data) = payload?;
    let backend = state
        .backend
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("NODE_BACKEND_URL is not configured".to_string()))?;

    backend.send_ocr_result(&invoice_id, &data).await.map_err(|e| {
        error!(invoice_id = %invoice_id, error = %e, "Callback to backend failed");
        ApiError::internal("Error processing callback", e)
    })?;

    Ok(Json(json!({
        "status": "success",
        "message": "Callback processed successfully"
    })))
}
