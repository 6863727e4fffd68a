use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use tracing::{error, info};

use crate::api::rag::RagState;
use crate::api::{task_status_response, ApiError, ApiResult, ResultField};
use crate::models::{IndexingRequest, TaskResponse};
use crate::services::indexing_service::{is_valid_data_type, ALL_DATA_TYPES, DATA_TYPES};

pub async fn index_data(
    State(state): State<RagState>,
    payload: Result<Json<IndexingRequest>, JsonRejection>,
) -> ApiResult<Json<TaskResponse>> {
    let Json(request) = payload?;
    if !is_valid_data_type(&request.data_type) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported data type: {}. Expected one of: {}, {}",
            request.data_type,
            DATA_TYPES.join(", "),
            ALL_DATA_TYPES
        )));
    }

    let full_refresh = request.options.map(|o| o.full_refresh).unwrap_or(false);
    let indexing = state.indexing.clone();
    let data_type = request.data_type.clone();
    let task_id = state
        .queue
        .submit("index", Some(request.data_type.as_str()), async move {
            indexing.index_data(&data_type, full_refresh).await
        })
        .map_err(|e| {
            error!(error = %e, "Error starting indexing task");
            ApiError::internal("Error starting indexing task", e)
        })?;

    info!(task_id = %task_id, data_type = %request.data_type, full_refresh, "Indexing task started");
    Ok(Json(TaskResponse::processing(
        &task_id,
        format!("Indexing {} data", request.data_type),
    )))
}

pub async fn indexing_status(
    State(state): State<RagState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    let record = state
        .queue
        .status(&task_id)
        .map_err(|e| {
            error!(task_id = %task_id, error = %e, "Error checking indexing status");
            ApiError::internal("Error checking indexing status", e)
        })?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task_id)))?;

    Ok(Json(task_status_response(record, ResultField::Details)))
}
