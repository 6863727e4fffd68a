use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::services::indexing_service::{records_from_body, RecordSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the Node backend, authenticated with an optional bearer key.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow!("HTTP client: {}", e))?;
        Ok(BackendClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Forwards an OCR result to `/api/invoices/<id>/ocr-result`.
    pub async fn send_ocr_result(&self, invoice_id: &str, data: &Value) -> Result<()> {
        let url = format!("{}/api/invoices/{}/ocr-result", self.base_url, invoice_id);
        let response = self
            .authorized(self.client.post(&url))
            .json(data)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Backend error {}: {}", status, body));
        }
        info!(invoice_id, "OCR result delivered to backend");
        Ok(())
    }
}

#[async_trait]
impl RecordSource for BackendClient {
    async fn fetch(&self, data_type: &str) -> Result<Vec<Value>> {
        let url = format!("{}/api/{}", self.base_url, data_type);
        let response = self.authorized(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Backend error {} for {}: {}", status, data_type, body));
        }

        records_from_body(response.json().await?)
    }
}
