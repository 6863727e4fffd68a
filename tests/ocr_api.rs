use anyhow::{anyhow, Result};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use thea_services::api::ocr::{build_router, OcrState, INVALID_FILE_TYPE};
use thea_services::db::Database;
use thea_services::services::task_queue::TaskQueue;
use thea_services::services::text_extraction::TextRecognizer;

const INVOICE_TEXT: &str = "Invoice #1001\nDate: 15/03/2024\nClient ID: ACME01\nTotal: $123,45\n2 x $10.00 Widget";

struct FixedText;

impl TextRecognizer for FixedText {
    fn recognize(&self, path: &Path) -> Result<String> {
        assert!(path.exists());
        Ok(INVOICE_TEXT.to_string())
    }
}

struct Unreadable;

impl TextRecognizer for Unreadable {
    fn recognize(&self, _path: &Path) -> Result<String> {
        Err(anyhow!("Could not read image file"))
    }
}

struct TestServer {
    base: String,
    upload_dir: PathBuf,
}

async fn spawn(recognizer: Arc<dyn TextRecognizer>, max_file_size: usize) -> TestServer {
    let upload_dir = std::env::temp_dir().join(format!("ocr-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&upload_dir).unwrap();

    let queue = TaskQueue::new(Arc::new(Mutex::new(Database::in_memory().unwrap())), 2);
    let app = build_router(OcrState {
        queue,
        recognizer,
        upload_dir: upload_dir.clone(),
        max_file_size,
        api_prefix: "/api/v1".to_string(),
        backend: None,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        upload_dir,
    }
}

fn file_form(bytes: &[u8], file_name: &str, mime: &str) -> Form {
    let part = Part::bytes(bytes.to_vec())
        .file_name(file_name.to_string())
        .mime_str(mime)
        .unwrap();
    Form::new().part("file", part)
}

async fn poll_until_done(client: &reqwest::Client, base: &str, task_id: &str) -> Value {
    for _ in 0..200 {
        let body: Value = client
            .get(format!("{}/api/v1/task/{}", base, task_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["status"] != "processing" {
            return body;
        }
        assert_eq!(body["message"], "Task is still processing");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {} did not finish", task_id);
}

#[tokio::test]
async fn health_reports_service_name() {
    let server = spawn(Arc::new(FixedText), 1024).await;
    let body: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "healthy", "service": "ocr"}));
}

#[tokio::test]
async fn rejects_unsupported_file_type() {
    let server = spawn(Arc::new(FixedText), 1024).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/process-invoice", server.base))
        .multipart(file_form(b"GIF89a", "scan.gif", "image/gif"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], INVALID_FILE_TYPE);
}

#[tokio::test]
async fn rejects_oversized_upload() {
    let server = spawn(Arc::new(FixedText), 16).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/process-invoice", server.base))
        .multipart(file_form(&[0u8; 100], "scan.png", "image/png"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn upload_is_processed_and_cleaned_up() {
    let server = spawn(Arc::new(FixedText), 1024).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/v1/process-invoice", server.base))
        .multipart(file_form(b"%PDF-1.4 fake", "invoice.pdf", "application/pdf"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["status"], "processing");
    assert_eq!(accepted["message"], "Invoice is being processed");
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    let done = poll_until_done(&client, &server.base, &task_id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["task_id"], task_id.as_str());
    let data = &done["data"];
    assert_eq!(data["invoiceNumber"], "1001");
    assert_eq!(data["date"], "2024-03-15T00:00:00");
    assert_eq!(data["clientId"], "ACME01");
    assert_eq!(data["totalAmount"], 123.45);
    assert_eq!(data["status"], "PENDING");
    assert_eq!(data["items"][0]["quantity"], 2);
    assert_eq!(data["items"][0]["totalPrice"], 20.0);

    let leftovers = std::fs::read_dir(&server.upload_dir).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn failed_recognition_reports_error() {
    let server = spawn(Arc::new(Unreadable), 1024).await;
    let client = reqwest::Client::new();

    let accepted: Value = client
        .post(format!("{}/api/v1/process-invoice", server.base))
        .multipart(file_form(b"\x89PNG broken", "scan.png", "image/png"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    let done = poll_until_done(&client, &server.base, &task_id).await;
    assert_eq!(done["status"], "failed");
    assert_eq!(done["error"], "Could not read image file");
    assert!(done.get("data").is_none());
    assert_eq!(std::fs::read_dir(&server.upload_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let server = spawn(Arc::new(FixedText), 1024).await;
    let response = reqwest::get(format!("{}/api/v1/task/does-not-exist", server.base))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Task does-not-exist not found");
}

#[tokio::test]
async fn callback_without_backend_is_unavailable() {
    let server = spawn(Arc::new(FixedText), 1024).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/invoices/callback/inv-1", server.base))
        .json(&json!({"invoiceNumber": "1001"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
