use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    // try_init: integration tests may build several routers in one process.
    let result = if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    let _ = result;
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Local wall-clock time, ISO-8601 with microseconds.
pub fn now_iso_local() -> String {
    Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Creates the directory that will hold `path`, e.g. a database file.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Create {}: {}", parent.display(), e))?;
    }
    Ok(())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Parses an amount such as `123,45` or `123.45`.
pub fn parse_decimal(value: &str) -> Result<f64> {
    value
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|e| anyhow!("Parse decimal: {}", e))
}

/// Strict day/month/year parse with a four-digit year, rendered as a midnight
/// ISO-8601 timestamp.
pub fn parse_dmy_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    // chrono's %Y also takes 1-3 digit years
    let year = raw.rsplit('/').next()?;
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(midnight.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// First `max_chars` characters, with `...` appended when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
