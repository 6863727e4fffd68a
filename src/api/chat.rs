use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use tracing::error;

use crate::api::rag::RagState;
use crate::api::{ApiError, ApiResult};
use crate::models::{ChatRequest, ChatResponse, ConversationExchange};

pub async fn chat(
    State(state): State<RagState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(request) = payload?;
    let response = state
        .chat
        .process_query(&request.query, request.conversation_id, request.context.as_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "Error processing chat request");
            ApiError::internal("Error processing chat request", e)
        })?;
    Ok(Json(response))
}

pub async fn conversation_history(
    State(state): State<RagState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<ConversationExchange>>> {
    let history = state
        .chat
        .get_conversation_history(&conversation_id)
        .map_err(|e| {
            error!(conversation_id = %conversation_id, error = %e, "Error retrieving conversation history");
            ApiError::internal("Error retrieving conversation history", e)
        })?;
    Ok(Json(history))
}
