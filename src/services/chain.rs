use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::ScoredDocument;
use crate::services::llm::{Embedder, Generator};
use crate::services::vector_store::VectorStore;

/// Question answering over retrieved passages. Output shape varies; see `normalizer`.
#[async_trait]
pub trait QaChain: Send + Sync {
    async fn call(&self, question: &str) -> Result<Value>;
}

pub struct RetrievalChain {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    store: VectorStore,
    top_k: usize,
    schema: JSONSchema,
}

impl RetrievalChain {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: VectorStore,
        top_k: usize,
    ) -> Self {
        RetrievalChain {
            embedder,
            generator,
            store,
            top_k: top_k.max(1),
            schema: answer_schema(),
        }
    }
}

#[async_trait]
impl QaChain for RetrievalChain {
    async fn call(&self, question: &str) -> Result<Value> {
        let embedding = self.embedder.embed(question).await?;
        let passages = self.store.similarity_search(&embedding, self.top_k)?;
        debug!(count = passages.len(), "Retrieved passages");

        let prompt = build_prompt(question, &passages);
        let raw = self.generator.generate(&prompt).await?;
        let source_documents: Vec<Value> = passages.iter().map(source_document).collect();

        let mut record = Map::new();
        record.insert("question".into(), Value::String(question.to_string()));
        let parsed = parse_json(&raw).ok().filter(|value| self.schema.is_valid(value));
        match parsed.as_ref().and_then(Value::as_object) {
            Some(answer) => {
                for key in ["answer", "sources"] {
                    if let Some(value) = answer.get(key) {
                        record.insert(key.into(), value.clone());
                    }
                }
            }
            None => {
                warn!("Model reply did not match the answer schema; passing raw text");
                record.insert("text".into(), Value::String(raw));
            }
        }
        record.insert("source_documents".into(), Value::Array(source_documents));
        Ok(Value::Object(record))
    }
}

fn build_prompt(question: &str, passages: &[ScoredDocument]) -> String {
    let mut prompt = String::from(
        "You answer questions about invoices, clients, suppliers and projects using only the passages below.\n\
         Return JSON only, shaped as {\"answer\": string, \"sources\": string}.\n\
         \"sources\" lists the source of every passage you used, one per line, exactly as given.\n\
         If the passages do not contain the answer, say so in \"answer\" and leave \"sources\" empty.\n\n",
    );
    if passages.is_empty() {
        prompt.push_str("(no passages)\n");
    }
    for (i, passage) in passages.iter().enumerate() {
        prompt.push_str(&format!(
            "Passage {}:\n{}\nSource: {}\n\n",
            i + 1,
            passage.document.text,
            passage.document.source
        ));
    }
    prompt.push_str(&format!("Question: {}\n", question));
    prompt
}

fn source_document(passage: &ScoredDocument) -> Value {
    json!({
        "page_content": passage.document.text,
        "metadata": passage.document.metadata,
    })
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str::<Value>(raw).map_err(|e| anyhow!("Invalid JSON: {}", e))
}

fn answer_schema() -> JSONSchema {
    let schema = json!({
        "type": "object",
        "required": ["answer", "sources"],
        "properties": {
            "answer": {"type": "string"},
            "sources": {"type": "string"}
        }
    });

    JSONSchema::compile(&schema).expect("Invalid JSON schema")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::vector_store::NewDocument;
    use std::sync::Mutex;

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("Acme") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    struct CannedGenerator(&'static str);

    #[async_trait]
    impl Generator for CannedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            assert!(prompt.contains("Question:"));
            Ok(self.0.to_string())
        }
    }

    fn seeded_store() -> VectorStore {
        let store = VectorStore::new(Arc::new(Mutex::new(Database::in_memory().unwrap())));
        let mut metadata = Map::new();
        metadata.insert("source".into(), json!("clients:1"));
        store
            .add_documents(&[
                (
                    NewDocument {
                        data_type: "clients".into(),
                        source: "clients:1".into(),
                        text: "Client: Acme".into(),
                        metadata,
                    },
                    vec![1.0, 0.0],
                ),
                (
                    NewDocument {
                        data_type: "projects".into(),
                        source: "projects:2".into(),
                        text: "Project: Relaunch".into(),
                        metadata: Map::new(),
                    },
                    vec![0.0, 1.0],
                ),
            ])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn valid_reply_becomes_answer_and_sources() {
        let chain = RetrievalChain::new(
            Arc::new(AxisEmbedder),
            Arc::new(CannedGenerator(r#"{"answer": "Acme is a client.", "sources": "clients:1"}"#)),
            seeded_store(),
            1,
        );
        let out = chain.call("Who is Acme?").await.unwrap();
        assert_eq!(out["question"], "Who is Acme?");
        assert_eq!(out["answer"], "Acme is a client.");
        assert_eq!(out["sources"], "clients:1");
        let docs = out["source_documents"].as_array().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["page_content"], "Client: Acme");
        assert_eq!(docs[0]["metadata"]["source"], "clients:1");
    }

    #[tokio::test]
    async fn invalid_reply_is_kept_as_text() {
        let chain = RetrievalChain::new(
            Arc::new(AxisEmbedder),
            Arc::new(CannedGenerator("not json at all")),
            seeded_store(),
            4,
        );
        let out = chain.call("Anything?").await.unwrap();
        assert!(out.get("answer").is_none());
        assert_eq!(out["text"], "not json at all");
        assert_eq!(out["source_documents"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reply_missing_fields_fails_schema() {
        let chain = RetrievalChain::new(
            Arc::new(AxisEmbedder),
            Arc::new(CannedGenerator(r#"{"answer": 42}"#)),
            seeded_store(),
            4,
        );
        let out = chain.call("Anything?").await.unwrap();
        assert_eq!(out["text"], r#"{"answer": 42}"#);
    }

    #[test]
    fn prompt_lists_passages_with_sources() {
        let passages = vec![ScoredDocument {
            document: crate::models::StoredDocument {
                id: "x".into(),
                data_type: "invoices".into(),
                source: "invoices:7".into(),
                text: "Invoice #7".into(),
                metadata: Map::new(),
            },
            score: 0.9,
        }];
        let prompt = build_prompt("What is due?", &passages);
        assert!(prompt.contains("Invoice #7\nSource: invoices:7"));
        assert!(prompt.ends_with("Question: What is due?\n"));
    }
}
