use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::models::{ScoredDocument, StoredDocument};
use crate::utils::sha256_hex;

/// Embedding store over the `documents` table, searched by brute-force cosine similarity.
#[derive(Clone)]
pub struct VectorStore {
    db: Arc<Mutex<Database>>,
}

/// One chunk ready for insertion.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub data_type: String,
    pub source: String,
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl VectorStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        VectorStore { db }
    }

    /// Upserts each document with its embedding; ids derive from source and text.
    pub fn add_documents(&self, documents: &[(NewDocument, Vec<f32>)]) -> Result<usize> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        for (doc, embedding) in documents {
            let stored = StoredDocument {
                id: sha256_hex(&[&doc.source, &doc.text]),
                data_type: doc.data_type.clone(),
                source: doc.source.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
            };
            db.upsert_document(&stored, embedding)?;
        }
        Ok(documents.len())
    }

    pub fn delete_type(&self, data_type: &str) -> Result<usize> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.delete_documents_by_type(data_type)?)
    }

    pub fn count(&self) -> Result<usize> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.count_documents()?)
    }

    pub fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        let documents = {
            let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
            db.all_documents()?
        };

        let mut scored: Vec<ScoredDocument> = documents
            .into_iter()
            .filter(|(_, embedding)| embedding.len() == query.len())
            .map(|(document, embedding)| ScoredDocument {
                score: cosine_similarity(query, &embedding),
                document,
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
