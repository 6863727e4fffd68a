use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;

use crate::models::{ConversationExchange, Source, StoredDocument, TaskRecord, TaskState};
use crate::utils::now_rfc3339;

const INTERRUPTED_ERROR: &str = "interrupted by restart";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_tasks.sql",
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/001_create_tasks.sql")),
            ),
            (
                "002_create_conversations.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_create_conversations.sql"
                )),
            ),
            (
                "003_create_documents.sql",
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/003_create_documents.sql")),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    // ---- tasks -----------------------------------------------------------

    pub fn insert_task(&self, id: &str, kind: &str, payload: Option<&str>) -> SqlResult<()> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO tasks (id, kind, state, payload, result, error, created_at, updated_at)
             VALUES (?1, ?2, 'processing', ?3, NULL, NULL, ?4, ?4)",
            params![id, kind, payload, now],
        )?;
        Ok(())
    }

    /// Returns false when the task had already left `processing`.
    pub fn complete_task(&self, id: &str, result: &str) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tasks SET state = 'completed', result = ?2, updated_at = ?3
             WHERE id = ?1 AND state = 'processing'",
            params![id, result, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn fail_task(&self, id: &str, error: &str) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tasks SET state = 'failed', error = ?2, updated_at = ?3
             WHERE id = ?1 AND state = 'processing'",
            params![id, error, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn fail_interrupted_tasks(&self) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE tasks SET state = 'failed', error = ?1, updated_at = ?2 WHERE state = 'processing'",
            params![INTERRUPTED_ERROR, now_rfc3339()],
        )
    }

    pub fn get_task(&self, id: &str) -> SqlResult<Option<TaskRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, state, payload, result, error, created_at, updated_at
             FROM tasks WHERE id = ?1",
        )?;
        stmt.query_row(params![id], task_from_row).optional()
    }

    // ---- conversations ---------------------------------------------------

    pub fn insert_exchange(
        &self,
        conversation_id: &str,
        query: &str,
        response: &str,
        sources: &[Source],
    ) -> SqlResult<()> {
        let sources_json = serde_json::to_string(sources).map_err(to_sql_error)?;
        self.conn.execute(
            "INSERT INTO conversations (conversation_id, query, response, sources, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![conversation_id, query, response, sources_json, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, conversation_id: &str) -> SqlResult<Vec<ConversationExchange>> {
        let mut stmt = self.conn.prepare(
            "SELECT conversation_id, query, response, sources, created_at
             FROM conversations
             WHERE conversation_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id], |row| {
            let sources: String = row.get(3)?;
            Ok(ConversationExchange {
                conversation_id: row.get(0)?,
                query: row.get(1)?,
                response: row.get(2)?,
                sources: serde_json::from_str(&sources).map_err(to_sql_error)?,
                created_at: row.get(4)?,
            })
        })?;

        rows.collect()
    }

    // ---- documents (vector store) ---------------------------------------

    pub fn upsert_document(&self, document: &StoredDocument, embedding: &[f32]) -> SqlResult<()> {
        let metadata = serde_json::to_string(&document.metadata).map_err(to_sql_error)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO documents (id, data_type, source, text, metadata, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                document.id,
                document.data_type,
                document.source,
                document.text,
                metadata,
                encode_embedding(embedding),
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn delete_documents_by_type(&self, data_type: &str) -> SqlResult<usize> {
        self.conn
            .execute("DELETE FROM documents WHERE data_type = ?1", params![data_type])
    }

    pub fn count_documents(&self) -> SqlResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All documents with their embeddings, for brute-force similarity scans.
    pub fn all_documents(&self) -> SqlResult<Vec<(StoredDocument, Vec<f32>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, data_type, source, text, metadata, embedding FROM documents ORDER BY created_at",
        )?;

        let rows = stmt.query_map([], |row| {
            let metadata: String = row.get(4)?;
            let embedding: Vec<u8> = row.get(5)?;
            Ok((
                StoredDocument {
                    id: row.get(0)?,
                    data_type: row.get(1)?,
                    source: row.get(2)?,
                    text: row.get(3)?,
                    metadata: serde_json::from_str(&metadata).map_err(to_sql_error)?,
                },
                decode_embedding(&embedding),
            ))
        })?;

        rows.collect()
    }
}

fn task_from_row(row: &Row<'_>) -> SqlResult<TaskRecord> {
    let state: String = row.get(2)?;
    let result: Option<String> = row.get(4)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        state: TaskState::parse(&state)
            .ok_or_else(|| to_sql_error(format!("unknown task state {}", state)))?,
        payload: row.get(3)?,
        result: result
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(to_sql_error)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn to_sql_error<E: std::fmt::Display>(e: E) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(e.to_string().into())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
