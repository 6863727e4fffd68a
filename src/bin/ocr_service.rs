use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{info, warn};

use thea_services::api::ocr::{build_router, OcrState};
use thea_services::config::OcrSettings;
use thea_services::db::Database;
use thea_services::services::backend::BackendClient;
use thea_services::services::task_queue::TaskQueue;
use thea_services::services::text_extraction::TesseractRecognizer;
use thea_services::utils::{ensure_parent_dir, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = OcrSettings::from_env()?;
    init_tracing(&settings.log_level);
    info!("Starting up OCR service");

    std::fs::create_dir_all(&settings.upload_dir)?;
    ensure_parent_dir(&settings.database_path)?;
    let db = Database::new(&settings.database_path)?;

    let queue = TaskQueue::new(Arc::new(Mutex::new(db)), settings.worker_concurrency);
    queue.recover()?;

    let backend = match &settings.node_backend_url {
        Some(url) => Some(BackendClient::new(url.clone(), settings.api_key.clone())?),
        None => {
            warn!("NODE_BACKEND_URL not set; invoice callbacks are disabled");
            None
        }
    };

    let app = build_router(OcrState {
        queue,
        recognizer: Arc::new(TesseractRecognizer::new(settings.ocr_language.clone())),
        upload_dir: settings.upload_dir.clone(),
        max_file_size: settings.max_file_size,
        api_prefix: settings.api_prefix.clone(),
        backend,
    });

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, prefix = %settings.api_prefix, "OCR service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down OCR service");
        })
        .await?;
    Ok(())
}
