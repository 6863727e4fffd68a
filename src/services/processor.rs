use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::InvoiceExtraction;
use crate::services::extractor::InvoiceFieldExtractor;
use crate::services::text_extraction::{validate_text_quality, TextRecognizer};
use crate::utils::sha256_file;

/// Owns an uploaded file and removes it when dropped.
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn new(path: PathBuf) -> Self {
        TempUpload { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Cleaned up temporary file"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not clean up file"),
        }
    }
}

/// OCR + field extraction for one uploaded invoice. The upload is deleted on every path out.
pub fn process_invoice(upload: TempUpload, recognizer: &dyn TextRecognizer) -> Result<InvoiceExtraction> {
    let path = upload.path();
    match sha256_file(path) {
        Ok(hash) => info!(path = %path.display(), file_hash = %hash, "Processing invoice"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not hash upload"),
    }

    let text = recognizer.recognize(path)?;
    if !validate_text_quality(&text) {
        warn!(chars = text.len(), "OCR produced little text; extraction will mostly default");
    }

    Ok(InvoiceFieldExtractor::extract(&text))
}
