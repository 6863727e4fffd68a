use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceExtraction {
    pub invoice_number: String,
    pub date: String,
    pub due_date: Option<String>,
    pub total_amount: f64,
    pub tax_amount: f64,
    pub status: String,
    pub client_id: String,
    pub project_id: Option<String>,
    pub description: Option<String>,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: u64,
    pub unit_price: f64,
    pub total_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<Source>,
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: String,
    pub reference: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExchange {
    pub conversation_id: String,
    pub query: String,
    pub response: String,
    pub sources: Vec<Source>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(TaskState::Processing),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: String,
    pub state: TaskState,
    pub payload: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Envelope returned by enqueue and status endpoints of both services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResponse {
    pub fn processing(task_id: &str, message: impl Into<String>) -> Self {
        TaskResponse {
            status: TaskState::Processing.as_str().to_string(),
            task_id: task_id.to_string(),
            message: Some(message.into()),
            data: None,
            details: None,
            error: None,
        }
    }

    pub fn failed(task_id: &str, error: impl Into<String>) -> Self {
        TaskResponse {
            status: TaskState::Failed.as_str().to_string(),
            task_id: task_id.to_string(),
            message: None,
            data: None,
            details: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingRequest {
    pub data_type: String,
    #[serde(default)]
    pub options: Option<IndexingOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingOptions {
    #[serde(default)]
    pub full_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSummary {
    pub status: String,
    pub message: String,
    pub details: IndexingDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingDetails {
    pub document_count: usize,
    pub data_type: String,
}

/// A chunk of indexed text, as held by the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub data_type: String,
    pub source: String,
    pub text: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: StoredDocument,
    pub score: f32,
}
