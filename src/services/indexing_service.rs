//! Pulls business records from the backend and indexes them for retrieval.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{IndexingDetails, IndexingSummary};
use crate::services::chunker::TextSplitter;
use crate::services::llm::Embedder;
use crate::services::vector_store::{NewDocument, VectorStore};

pub const DATA_TYPES: [&str; 4] = ["invoices", "clients", "suppliers", "projects"];
pub const ALL_DATA_TYPES: &str = "all";

pub fn is_valid_data_type(data_type: &str) -> bool {
    data_type == ALL_DATA_TYPES || DATA_TYPES.contains(&data_type)
}

/// Source of the raw records for one data type.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, data_type: &str) -> Result<Vec<Value>>;
}

/// Stands in when no backend URL is configured; every fetch fails.
pub struct UnconfiguredSource;

#[async_trait]
impl RecordSource for UnconfiguredSource {
    async fn fetch(&self, _data_type: &str) -> Result<Vec<Value>> {
        Err(anyhow!("NODE_BACKEND_URL is not configured"))
    }
}

/// Accepts either a bare array or `{"data": [...]}`.
pub fn records_from_body(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(anyhow!("Backend response has no data array")),
        },
        other => Err(anyhow!("Unexpected backend response: {}", other)),
    }
}

pub struct IndexingService {
    source: Arc<dyn RecordSource>,
    embedder: Arc<dyn Embedder>,
    store: VectorStore,
    splitter: TextSplitter,
}

impl IndexingService {
    pub fn new(
        source: Arc<dyn RecordSource>,
        embedder: Arc<dyn Embedder>,
        store: VectorStore,
        splitter: TextSplitter,
    ) -> Self {
        IndexingService {
            source,
            embedder,
            store,
            splitter,
        }
    }

    pub async fn index_data(&self, data_type: &str, full_refresh: bool) -> Result<IndexingSummary> {
        if !is_valid_data_type(data_type) {
            return Err(anyhow!("Unsupported data type: {}", data_type));
        }

        let document_count = if data_type == ALL_DATA_TYPES {
            self.rebuild_index(full_refresh).await
        } else {
            self.index_type(data_type, full_refresh).await?
        };

        Ok(IndexingSummary {
            status: "completed".to_string(),
            message: format!("Successfully indexed {} documents", document_count),
            details: IndexingDetails {
                document_count,
                data_type: data_type.to_string(),
            },
        })
    }

    /// Reindexes every data type, skipping the ones that fail.
    pub async fn rebuild_index(&self, full_refresh: bool) -> usize {
        info!("Rebuilding index");
        let mut total = 0;
        for data_type in DATA_TYPES {
            match self.index_type(data_type, full_refresh).await {
                Ok(count) => {
                    info!(data_type, count, "Reindexed data");
                    total += count;
                }
                Err(e) => error!(data_type, error = %e, "Failed to reindex"),
            }
        }
        info!(total, "Index rebuild completed");
        total
    }

    async fn index_type(&self, data_type: &str, full_refresh: bool) -> Result<usize> {
        let records = self.source.fetch(data_type).await?;
        info!(data_type, records = records.len(), "Fetched records");

        if full_refresh {
            let removed = self.store.delete_type(data_type)?;
            info!(data_type, removed, "Cleared existing documents");
        }

        let mut documents = Vec::new();
        for record in &records {
            let Some(fields) = record.as_object() else {
                warn!(data_type, "Skipping non-object record");
                continue;
            };
            let text = render_record(data_type, fields);
            let metadata = record_metadata(data_type, fields);
            let source = metadata
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or(data_type)
                .to_string();

            for chunk in self.splitter.split_text(&text) {
                let embedding = self.embedder.embed(&chunk).await?;
                documents.push((
                    NewDocument {
                        data_type: data_type.to_string(),
                        source: source.clone(),
                        text: chunk,
                        metadata: metadata.clone(),
                    },
                    embedding,
                ));
            }
        }

        self.store.add_documents(&documents)
    }
}

fn record_metadata(data_type: &str, record: &Map<String, Value>) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "source".into(),
        Value::String(format!("{}:{}", data_type, field(record, "id"))),
    );
    metadata.insert("type".into(), Value::String(data_type.to_string()));
    metadata.insert(
        "date".into(),
        record.get("createdAt").cloned().unwrap_or(Value::Null),
    );
    metadata
}

pub fn render_record(data_type: &str, record: &Map<String, Value>) -> String {
    match data_type {
        "invoices" => render_invoice(record),
        "clients" => render_client(record),
        "suppliers" => render_supplier(record),
        "projects" => render_project(record),
        _ => String::new(),
    }
}

fn render_invoice(invoice: &Map<String, Value>) -> String {
    let mut parts = vec![
        format!("Invoice #{}", field(invoice, "invoiceNumber")),
        format!("Date: {}", field(invoice, "date")),
        format!("Due Date: {}", field(invoice, "dueDate")),
        format!("Total Amount: {}", field(invoice, "totalAmount")),
        format!("Status: {}", field(invoice, "status")),
        format!("Description: {}", field(invoice, "description")),
    ];

    let items = invoice
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for item in items.iter().filter_map(Value::as_object) {
        parts.push(format!(
            "Item: {} - Quantity: {} - Price: {}",
            field(item, "description"),
            field(item, "quantity"),
            field(item, "unitPrice")
        ));
    }
    parts.join("\n")
}

fn render_client(client: &Map<String, Value>) -> String {
    [
        format!("Client: {}", field(client, "name")),
        format!("Email: {}", field(client, "email")),
        format!("Address: {}", field(client, "address")),
        format!("Phone: {}", field(client, "phone")),
        format!("Type: {}", field(client, "type")),
        format!("Status: {}", field(client, "status")),
    ]
    .join("\n")
}

fn render_supplier(supplier: &Map<String, Value>) -> String {
    [
        format!("Supplier: {}", field(supplier, "name")),
        format!("Email: {}", field(supplier, "email")),
        format!("Address: {}", field(supplier, "address")),
        format!("Phone: {}", field(supplier, "phone")),
        format!("Category: {}", field(supplier, "category")),
        format!("Status: {}", field(supplier, "status")),
    ]
    .join("\n")
}

fn render_project(project: &Map<String, Value>) -> String {
    [
        format!("Project: {}", field(project, "name")),
        format!("Description: {}", field(project, "description")),
        format!("Status: {}", field(project, "status")),
        format!("Start Date: {}", field(project, "startDate")),
        format!("End Date: {}", field(project, "endDate")),
        format!("Budget: {}", field(project, "budget")),
    ]
    .join("\n")
}

/// Missing and null fields render empty.
fn field(record: &Map<String, Value>, key: &str) -> String {
    match record.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
