use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::db::Database;
use crate::models::{ChatResponse, ConversationExchange};
use crate::services::chain::QaChain;
use crate::services::normalizer::{enhance_query_with_context, normalize_chain_output, EMPTY_QUERY_MESSAGE};

/// Answers chat queries through a `QaChain` and keeps the conversation log.
#[derive(Clone)]
pub struct ChatService {
    chain: Arc<dyn QaChain>,
    db: Arc<Mutex<Database>>,
}

impl ChatService {
    pub fn new(chain: Arc<dyn QaChain>, db: Arc<Mutex<Database>>) -> Self {
        ChatService { chain, db }
    }

    pub async fn process_query(
        &self,
        query: &str,
        conversation_id: Option<String>,
        context: Option<&Map<String, Value>>,
    ) -> Result<ChatResponse> {
        let conversation_id = conversation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if query.trim().is_empty() {
            return Ok(ChatResponse {
                response: EMPTY_QUERY_MESSAGE.to_string(),
                sources: Vec::new(),
                conversation_id,
            });
        }

        let enhanced = enhance_query_with_context(query, context);
        let raw = self.chain.call(&enhanced).await.map_err(|e| {
            error!(conversation_id = %conversation_id, error = %e, "Error processing query");
            e
        })?;
        debug!(conversation_id = %conversation_id, output = %raw, "QA chain output");

        let normalized = normalize_chain_output(&raw);
        let response = ChatResponse {
            response: normalized.response,
            sources: normalized.sources,
            conversation_id,
        };

        if let Err(e) = self.store_exchange(query, &response) {
            error!(conversation_id = %response.conversation_id, error = %e, "Error storing conversation");
        }
        info!(
            conversation_id = %response.conversation_id,
            sources = response.sources.len(),
            "Chat query answered"
        );
        Ok(response)
    }

    pub fn get_conversation_history(&self, conversation_id: &str) -> Result<Vec<ConversationExchange>> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.get_conversation(conversation_id)?)
    }

    fn store_exchange(&self, query: &str, response: &ChatResponse) -> Result<()> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        db.insert_exchange(
            &response.conversation_id,
            query,
            &response.response,
            &response.sources,
        )?;
        Ok(())
    }
}
