use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::models::Source;
use crate::utils::truncate_chars;

pub const EMPTY_QUERY_MESSAGE: &str =
    "I'm sorry, but your query appears to be empty. Please provide a question or request.";
pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I encountered an issue processing your request. Please try again.";

const ANSWER_KEYS: [&str; 5] = ["answer", "result", "text", "output", "response"];
const SOURCE_KEYS: [&str; 3] = ["sources", "source_documents", "documents"];
const MIN_FALLBACK_ANSWER_CHARS: usize = 10;
const REFERENCE_MAX_CHARS: usize = 200;
const DEFAULT_CONFIDENCE: f64 = 0.9;
const UNKNOWN_CONFIDENCE: f64 = 0.5;

/// Normalized answer and sources; the caller attaches the conversation id.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOutput {
    pub response: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainSources {
    Lines(String),
    Items(Vec<SourceItem>),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    Document {
        page_content: String,
        metadata: Map<String, Value>,
    },
    Text(String),
    /// A document whose content is not text.
    Malformed(String),
    Unrecognized,
}

/// Appends `" Context: k: v. k2: v2"` to the query, skipping null values.
pub fn enhance_query_with_context(query: &str, context: Option<&Map<String, Value>>) -> String {
    let context = match context {
        Some(ctx) if !ctx.is_empty() => ctx,
        _ => return query.to_string(),
    };

    let rendered: Vec<String> = context
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| format!("{}: {}", key, render_scalar(value)))
        .collect();

    format!("{} Context: {}", query, rendered.join(". "))
}

pub fn normalize_chain_output(raw: &Value) -> NormalizedOutput {
    let record = match raw {
        Value::Object(record) => record,
        other => {
            return NormalizedOutput {
                response: render_scalar(other),
                sources: Vec::new(),
            }
        }
    };

    NormalizedOutput {
        response: extract_answer(record),
        sources: process_sources(&decode_sources(record)),
    }
}

pub fn extract_answer(record: &Map<String, Value>) -> String {
    if let Some(answer) = ANSWER_KEYS
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|value| is_truthy(value))
    {
        return render_scalar(answer);
    }

    let keys: Vec<&String> = record.keys().collect();
    warn!(?keys, "Unexpected chain output format");

    record
        .values()
        .filter_map(Value::as_str)
        .find(|s| s.chars().count() > MIN_FALLBACK_ANSWER_CHARS)
        .map(str::to_string)
        .unwrap_or_else(|| APOLOGY_MESSAGE.to_string())
}

pub fn decode_sources(record: &Map<String, Value>) -> ChainSources {
    let value = SOURCE_KEYS
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|value| is_truthy(value));

    match value {
        None => ChainSources::Items(Vec::new()),
        Some(Value::String(lines)) => ChainSources::Lines(lines.clone()),
        Some(Value::Array(items)) => ChainSources::Items(items.iter().map(decode_item).collect()),
        Some(other) => ChainSources::Other(other.clone()),
    }
}

fn decode_item(item: &Value) -> SourceItem {
    match item {
        Value::String(text) => SourceItem::Text(text.clone()),
        Value::Object(obj) if obj.contains_key("page_content") => {
            let page_content = match obj.get("page_content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => return SourceItem::Malformed(other.to_string()),
                None => return SourceItem::Unrecognized,
            };
            let metadata = obj
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            SourceItem::Document {
                page_content,
                metadata,
            }
        }
        _ => SourceItem::Unrecognized,
    }
}

/// Builds the source list; a failure anywhere yields an empty list.
pub fn process_sources(sources: &ChainSources) -> Vec<Source> {
    match try_process_sources(sources) {
        Ok(processed) => processed,
        Err(e) => {
            error!(error = %e, "Error processing sources");
            Vec::new()
        }
    }
}

fn try_process_sources(sources: &ChainSources) -> Result<Vec<Source>> {
    let processed = match sources {
        ChainSources::Lines(text) => text
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let mut parts = line.split(':');
                let source_type = parts.next()?;
                let reference = parts.next()?;
                Some(Source {
                    source_type: source_type.trim().to_string(),
                    reference: reference.trim().to_string(),
                    confidence: DEFAULT_CONFIDENCE,
                    metadata: None,
                })
            })
            .collect(),
        ChainSources::Items(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    SourceItem::Document {
                        page_content,
                        metadata,
                    } => out.push(Source {
                        source_type: "document".to_string(),
                        reference: truncate_chars(page_content, REFERENCE_MAX_CHARS),
                        confidence: DEFAULT_CONFIDENCE,
                        metadata: Some(metadata.clone()),
                    }),
                    SourceItem::Text(text) => out.push(Source {
                        source_type: "text".to_string(),
                        reference: text.clone(),
                        confidence: DEFAULT_CONFIDENCE,
                        metadata: None,
                    }),
                    SourceItem::Malformed(content) => {
                        return Err(anyhow!("Document content is not text: {}", content));
                    }
                    SourceItem::Unrecognized => continue,
                }
            }
            out
        }
        ChainSources::Other(value) => vec![Source {
            source_type: "unknown".to_string(),
            reference: serde_json::to_string(value).map_err(|e| anyhow!("Render source: {}", e))?,
            confidence: UNKNOWN_CONFIDENCE,
            metadata: None,
        }],
    };
    Ok(processed)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
