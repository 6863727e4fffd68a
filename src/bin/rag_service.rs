use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use thea_services::api::rag::{build_router, RagState};
use thea_services::config::RagSettings;
use thea_services::db::Database;
use thea_services::services::backend::BackendClient;
use thea_services::services::chain::RetrievalChain;
use thea_services::services::chat_service::ChatService;
use thea_services::services::chunker::TextSplitter;
use thea_services::services::indexing_service::{IndexingService, RecordSource, UnconfiguredSource};
use thea_services::services::llm::{OllamaClient, OllamaConfig};
use thea_services::services::task_queue::TaskQueue;
use thea_services::services::vector_store::VectorStore;
use thea_services::utils::{ensure_parent_dir, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = RagSettings::from_env()?;
    init_tracing(&settings.log_level);
    info!("Starting RAG chatbot service");

    ensure_parent_dir(&settings.database_path)?;
    let db = Arc::new(Mutex::new(Database::new(&settings.database_path)?));

    let ollama = Arc::new(OllamaClient::new(OllamaConfig {
        base_url: settings.ollama_base_url.clone(),
        model: settings.ollama_model.clone(),
        embedding_model: settings.embedding_model.clone(),
        temperature: settings.llm_temperature,
        max_tokens: settings.llm_max_tokens,
    })?);

    if settings.wait_for_ollama {
        if !ollama.wait_until_ready().await {
            return Err(anyhow!("Ollama service at {} is not reachable", settings.ollama_base_url));
        }
        if let Err(e) = ollama.ensure_models().await {
            error!(error = %e, "Failed to prepare Ollama models");
        }
    }

    let store = VectorStore::new(db.clone());
    info!(documents = store.count()?, "Vector store initialized");

    let chain = RetrievalChain::new(ollama.clone(), ollama.clone(), store.clone(), settings.retrieval_top_k);
    let chat = ChatService::new(Arc::new(chain), db.clone());

    let source: Arc<dyn RecordSource> = match &settings.node_backend_url {
        Some(url) => Arc::new(BackendClient::new(url.clone(), settings.api_key.clone())?),
        None => {
            warn!("NODE_BACKEND_URL not set; indexing tasks will fail");
            Arc::new(UnconfiguredSource)
        }
    };
    let indexing = IndexingService::new(
        source,
        ollama,
        store,
        TextSplitter::new(settings.chunk_size, settings.chunk_overlap),
    );

    let queue = TaskQueue::new(db, settings.worker_concurrency);
    queue.recover()?;

    let app = build_router(RagState {
        chat,
        indexing: Arc::new(indexing),
        queue,
        api_prefix: settings.api_prefix.clone(),
    });

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, prefix = %settings.api_prefix, "RAG chatbot service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down RAG chatbot service");
        })
        .await?;
    Ok(())
}
