pub mod admin;
pub mod chat;
pub mod error;
pub mod ocr;
pub mod rag;

use axum::Router;

use crate::models::{TaskRecord, TaskResponse, TaskState};

pub use error::{ApiError, ApiResult};

const STILL_PROCESSING: &str = "Task is still processing";

/// Where a completed task's result goes in the status envelope.
#[derive(Debug, Clone, Copy)]
pub enum ResultField {
    Data,
    Details,
}

pub fn task_status_response(record: TaskRecord, field: ResultField) -> TaskResponse {
    match record.state {
        TaskState::Processing => TaskResponse::processing(&record.id, STILL_PROCESSING),
        TaskState::Failed => TaskResponse::failed(
            &record.id,
            record.error.unwrap_or_else(|| "Unknown error".to_string()),
        ),
        TaskState::Completed => {
            let mut response = TaskResponse {
                status: TaskState::Completed.as_str().to_string(),
                task_id: record.id,
                message: None,
                data: None,
                details: None,
                error: None,
            };
            match field {
                ResultField::Data => response.data = record.result,
                ResultField::Details => response.details = record.result,
            }
            response
        }
    }
}

/// Mounts `routes` under `prefix`; an empty prefix or `/` mounts at the root.
pub fn with_prefix<S>(prefix: &str, routes: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let prefix = prefix.trim().trim_end_matches('/');
    if prefix.is_empty() {
        return routes;
    }
    if prefix.starts_with('/') {
        Router::new().nest(prefix, routes)
    } else {
        Router::new().nest(&format!("/{}", prefix), routes)
    }
}
