use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_MAX_FILE_SIZE: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
    pub upload_dir: PathBuf,
    pub database_path: PathBuf,
    pub max_file_size: usize,
    pub ocr_language: String,
    pub worker_concurrency: usize,
    pub node_backend_url: Option<String>,
    pub api_key: Option<String>,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
    pub database_path: PathBuf,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub embedding_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub retrieval_top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub worker_concurrency: usize,
    pub node_backend_url: Option<String>,
    pub api_key: Option<String>,
    pub log_level: String,
    pub wait_for_ollama: bool,
}

impl OcrSettings {
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Ok(OcrSettings {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000)?,
            api_prefix: env_or("API_PREFIX", "/api/v1"),
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "./uploads")),
            database_path: PathBuf::from(env_or("DATABASE_PATH", "./data/ocr.sqlite")),
            max_file_size: env_parse("MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?,
            ocr_language: env_or("OCR_LANGUAGE", "eng"),
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 2)?,
            node_backend_url: env_opt("NODE_BACKEND_URL"),
            api_key: env_opt("API_KEY"),
            log_level: env_or("LOG_LEVEL", "info"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl RagSettings {
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        let settings = RagSettings {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8001)?,
            api_prefix: env_or("API_PREFIX", "/api/v1"),
            database_path: PathBuf::from(env_or("DATABASE_PATH", "./data/rag.sqlite")),
            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            ollama_model: env_or("OLLAMA_MODEL", "llama2"),
            embedding_model: env_or("EMBEDDING_MODEL", "all-minilm"),
            llm_temperature: env_parse("LLM_TEMPERATURE", 0.7)?,
            llm_max_tokens: env_parse("LLM_MAX_TOKENS", 1000)?,
            retrieval_top_k: env_parse("RETRIEVAL_TOP_K", 4)?,
            chunk_size: env_parse("CHUNK_SIZE", 1000)?,
            chunk_overlap: env_parse("CHUNK_OVERLAP", 200)?,
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 2)?,
            node_backend_url: env_opt("NODE_BACKEND_URL"),
            api_key: env_opt("API_KEY"),
            log_level: env_or("LOG_LEVEL", "info"),
            wait_for_ollama: env_parse("WAIT_FOR_OLLAMA", true)?,
        };
        if settings.chunk_overlap >= settings.chunk_size {
            return Err(anyhow!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                settings.chunk_overlap,
                settings.chunk_size
            ));
        }
        Ok(settings)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_dotenv() {
    // A missing .env is the normal case in containers.
    let _ = dotenvy::dotenv();
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow!("Invalid value for {}: {:?} ({})", key, raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_names_the_variable_on_error() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn parse_value_accepts_floats_and_bools() {
        assert_eq!(parse_value::<f32>("LLM_TEMPERATURE", "0.2").unwrap(), 0.2);
        assert!(!parse_value::<bool>("WAIT_FOR_OLLAMA", "false").unwrap());
    }
}
