use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::{admin, chat, with_prefix};
use crate::services::chat_service::ChatService;
use crate::services::indexing_service::IndexingService;
use crate::services::task_queue::TaskQueue;

/// Shared services behind the RAG chatbot routes.
#[derive(Clone)]
pub struct RagState {
    pub chat: ChatService,
    pub indexing: Arc<IndexingService>,
    pub queue: TaskQueue,
    pub api_prefix: String,
}

pub fn build_router(state: RagState) -> Router {
    let api = Router::new()
        .route("/chat", post(chat::chat))
        .route("/conversations/:conversation_id", get(chat::conversation_history))
        .route("/admin/index", post(admin::index_data))
        .route("/admin/index/status/:task_id", get(admin::indexing_status));

    Router::new()
        .route("/health", get(health))
        .merge(with_prefix(&state.api_prefix, api))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "rag-chatbot" }))
}
