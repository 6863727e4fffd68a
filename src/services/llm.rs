use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const READY_ATTEMPTS: u32 = 30;
const READY_DELAY: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const PULL_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model's raw completion for `prompt`, expected to be JSON.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

pub struct OllamaClient {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow!("HTTP client: {}", e))?;
        Ok(OllamaClient { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Polls `/api/version` until the server answers.
    pub async fn wait_until_ready(&self) -> bool {
        for attempt in 1..=READY_ATTEMPTS {
            match self.client.get(self.url("/api/version")).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Ollama service is ready");
                    return true;
                }
                _ => {
                    warn!(attempt, max = READY_ATTEMPTS, "Waiting for Ollama service...");
                    tokio::time::sleep(READY_DELAY).await;
                }
            }
        }
        error!("Failed to connect to Ollama service");
        false
    }

    /// Pulls the generation and embedding models when the server lacks them.
    pub async fn ensure_models(&self) -> Result<()> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Ollama tags error {}", response.status()));
        }
        let tags: TagsResponse = response.json().await?;
        let available: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();

        for model in [&self.config.model, &self.config.embedding_model] {
            if model_available(&available, model) {
                info!(model = %model, "Model is available");
                continue;
            }
            warn!(model = %model, ?available, "Model not found, pulling");
            self.pull_model(model).await?;
        }
        Ok(())
    }

    async fn pull_model(&self, model: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/pull"))
            .timeout(PULL_TIMEOUT)
            .json(&PullRequest {
                name: model,
                stream: false,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to pull model {} ({}): {}", model, status, body));
        }
        info!(model, "Successfully pulled model");
        Ok(())
    }
}

fn model_available(available: &[String], model: &str) -> bool {
    available
        .iter()
        .any(|name| name == model || name.strip_suffix(":latest") == Some(model))
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama error {}: {}", status, body));
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.response.trim().to_string())
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(self.url("/api/embeddings"))
            .json(&EmbeddingRequest {
                model: &self.config.embedding_model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama embedding error {}: {}", status, body));
        }

        let body: EmbeddingResponse = response.json().await?;
        if body.embedding.is_empty() {
            return Err(anyhow!("Empty embedding"));
        }
        Ok(body.embedding)
    }
}
