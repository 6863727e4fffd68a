use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use pdfium_render::prelude::{PdfRenderConfig, Pdfium};
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";
// Page render resolution.
const RENDER_DPI: f32 = 200.0;

// One pdfium binding at a time per process.
static PDFIUM_LOCK: Mutex<()> = Mutex::new(());

/// Turns an uploaded invoice file into raw text.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, path: &Path) -> Result<String>;
}

/// Renders the first page of a PDF that has no usable text layer.
pub trait PageRasterizer: Send + Sync {
    fn first_page(&self, path: &Path) -> Result<DynamicImage>;
}

pub struct PdfiumRasterizer;

impl PageRasterizer for PdfiumRasterizer {
    fn first_page(&self, path: &Path) -> Result<DynamicImage> {
        let _guard = PDFIUM_LOCK.lock().map_err(|e| anyhow!("pdfium lock: {}", e))?;
        let bindings = Pdfium::bind_to_system_library().map_err(|e| anyhow!("pdfium library: {}", e))?;
        let pdfium = Pdfium::new(bindings);

        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| anyhow!("PDF rendering failed for page 1: {}", e))?;
        let page = document
            .pages()
            .get(0)
            .map_err(|e| anyhow!("PDF rendering failed for page 1: {}", e))?;
        let config = PdfRenderConfig::new().scale_page_by_factor(RENDER_DPI / 72.0);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| anyhow!("PDF rendering failed for page 1: {}", e))?;

        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| anyhow!("PDF rendering failed for page 1: bitmap size mismatch"))
    }
}

/// What a PDF upload yields before OCR.
pub enum PdfContent {
    Text(String),
    Page(DynamicImage),
}

/// PDF text layer first, Tesseract on a binarized raster otherwise.
pub struct TesseractRecognizer {
    language: String,
    rasterizer: Box<dyn PageRasterizer>,
}

impl TesseractRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self::with_rasterizer(language, Box::new(PdfiumRasterizer))
    }

    pub fn with_rasterizer(language: impl Into<String>, rasterizer: Box<dyn PageRasterizer>) -> Self {
        TesseractRecognizer {
            language: language.into(),
            rasterizer,
        }
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, path: &Path) -> Result<String> {
        if is_pdf(path)? {
            TextExtractor::extract_from_pdf(path, &self.language, self.rasterizer.as_ref())
        } else {
            TextExtractor::extract_from_image(path, &self.language)
        }
    }
}

pub struct TextExtractor;

impl TextExtractor {
    pub fn extract_from_pdf(path: &Path, ocr_language: &str, rasterizer: &dyn PageRasterizer) -> Result<String> {
        match read_pdf(path, rasterizer)? {
            PdfContent::Text(text) => Ok(text),
            PdfContent::Page(page) => Self::recognize_bytes(&prepare_for_ocr(&page)?, ocr_language),
        }
    }

    pub fn extract_from_image(path: &Path, ocr_language: &str) -> Result<String> {
        let img = image::open(path).map_err(|_| anyhow!("Could not read image file"))?;
        Self::recognize_bytes(&prepare_for_ocr(&img)?, ocr_language)
    }

    fn recognize_bytes(bytes: &[u8], language: &str) -> Result<String> {
        let text = tesseract::Tesseract::new(None, Some(language))
            .map_err(|e| anyhow!("Tesseract init: {}", e))?
            .set_image_from_mem(bytes)
            .map_err(|e| anyhow!("Tesseract image: {}", e))?
            .recognize()
            .map_err(|e| anyhow!("Tesseract recognize: {}", e))?
            .get_text()
            .map_err(|e| anyhow!("OCR text: {}", e))?;
        Ok(text)
    }
}

/// Embedded text when the PDF has any, otherwise the rendered first page.
pub fn read_pdf(path: &Path, rasterizer: &dyn PageRasterizer) -> Result<PdfContent> {
    if let Ok(text) = pdf_extract::extract_text(path) {
        if !text.trim().is_empty() {
            debug!(chars = text.len(), "Using embedded PDF text layer");
            return Ok(PdfContent::Text(text));
        }
    }
    debug!(path = %path.display(), "No PDF text layer, rasterizing first page");
    Ok(PdfContent::Page(rasterizer.first_page(path)?))
}

/// Grayscale, Otsu-binarized PNG bytes ready for Tesseract.
pub fn prepare_for_ocr(img: &DynamicImage) -> Result<Vec<u8>> {
    let binarized = binarize(&img.to_luma8());
    let mut png = Cursor::new(Vec::new());
    binarized
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| anyhow!("Encode binarized image: {}", e))?;
    Ok(png.into_inner())
}

/// Sniffs the first bytes rather than trusting the extension.
pub fn is_pdf(path: &Path) -> Result<bool> {
    use std::io::Read;
    let mut head = [0u8; 4];
    let mut file = std::fs::File::open(path)?;
    let read = file.read(&mut head)?;
    Ok(read == PDF_MAGIC.len() && &head == PDF_MAGIC)
}

/// Global Otsu threshold: pixels above the level become white, the rest black.
pub fn binarize(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
    }
    out
}

pub fn otsu_level(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, count)| level as f64 * *count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best_level = 0u8;
    let mut best_variance = 0f64;

    for (level, count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }
        background_sum += level as f64 * *count as f64;

        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight as f64;
        let variance = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }
    best_level
}

pub fn validate_text_quality(text: &str) -> bool {
    text.len() > 50 && text.split_whitespace().count() > 10
}
