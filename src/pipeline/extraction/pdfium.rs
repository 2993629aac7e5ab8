//! PDF access via Google PDFium.
//!
//! `PdfiumDocument` owns the PDF bytes and reloads the document for each
//! operation because the upstream `Pdfium`/`PdfDocument` types are `!Send`
//! and borrow from each other. The OS caches `dlopen`, so repeat loads are
//! near-free.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::document::{DocumentHandle, DocumentLoader, ImageOptions, NativeMetadata};
use super::types::{ExtractedImage, ImageKind, PageText};
use super::ExtractionError;

/// Maximum dimension (width or height) for rendered page images.
const MAX_DIMENSION_PX: u32 = 4096;

/// PDF points per inch (standard PDF unit).
const POINTS_PER_INCH: f32 = 72.0;

/// Load the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path)
/// 2. Alongside the running executable, or in `<exe_dir>/pdfium/lib`
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::PdfiumUnavailable(format!("failed to load {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [exe_dir.to_path_buf(), exe_dir.join("pdfium").join("lib")];
            for dir in &candidates {
                let lib_path =
                    Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        ExtractionError::PdfiumUnavailable(format!(
            "not found; set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Map PDF load errors, detecting encrypted PDFs.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(format!("Failed to load PDF: {msg}"))
    }
}

/// Compute pixel dimensions for rendering, applying the dimension guard.
///
/// Returns (width_px, height_px), both clamped to [1, MAX_DIMENSION_PX].
/// Preserves aspect ratio when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A PDF held in memory.
pub struct PdfiumDocument {
    bytes: Option<Vec<u8>>,
}

impl PdfiumDocument {
    /// Open `bytes`, failing fast on a missing library or unreadable PDF.
    pub fn open(bytes: Vec<u8>) -> Result<Self, ExtractionError> {
        {
            let pdfium = load_pdfium()?;
            pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(map_load_error)?;
        }
        Ok(Self { bytes: Some(bytes) })
    }

    /// Run `op` against a freshly loaded document.
    fn with_document<T>(
        &self,
        op: impl FnOnce(&PdfDocument) -> Result<T, ExtractionError>,
    ) -> Result<T, ExtractionError> {
        let bytes = self.bytes.as_ref().ok_or(ExtractionError::DocumentReleased)?;
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(map_load_error)?;
        op(&document)
    }
}

impl DocumentHandle for PdfiumDocument {
    fn page_count(&self) -> Result<usize, ExtractionError> {
        self.with_document(|doc| Ok(doc.pages().len() as usize))
    }

    fn get_text(&self) -> Result<Vec<PageText>, ExtractionError> {
        self.with_document(|doc| {
            doc.pages()
                .iter()
                .enumerate()
                .map(|(index, page)| {
                    let text = page
                        .text()
                        .map_err(|e| {
                            ExtractionError::PdfParsing(format!(
                                "text layer unreadable on page {}: {e}",
                                index + 1
                            ))
                        })?
                        .all();
                    Ok(PageText {
                        page_number: index + 1,
                        text,
                    })
                })
                .collect()
        })
    }

    fn get_images(&self, options: &ImageOptions) -> Result<Vec<ExtractedImage>, ExtractionError> {
        self.with_document(|doc| {
            let mut images = Vec::new();
            for (index, page) in doc.pages().iter().enumerate() {
                let page_number = index + 1;
                for (object_index, object) in page.objects().iter().enumerate() {
                    let Some(image_object) = object.as_image_object() else {
                        continue;
                    };
                    let raw = match image_object.get_raw_image() {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!(page = page_number, error = %e, "Skipping undecodable embedded image");
                            continue;
                        }
                    };
                    let png = encode_png(&raw)?;
                    if png.len() <= options.min_size_bytes {
                        continue;
                    }
                    images.push(ExtractedImage::from_bytes(
                        &png,
                        format!("page{page_number}_img{object_index}.png"),
                        page_number,
                        raw.dimensions(),
                        "image/png",
                        ImageKind::Embedded,
                    ));
                }
            }
            debug!(count = images.len(), "Extracted embedded images");
            Ok(images)
        })
    }

    fn get_screenshots(&self, dpi: u32) -> Result<Vec<ExtractedImage>, ExtractionError> {
        self.with_document(|doc| {
            let mut shots = Vec::new();
            for (index, page) in doc.pages().iter().enumerate() {
                let page_number = index + 1;
                let (target_w, target_h) =
                    compute_render_dimensions(page.width().value, page.height().value, dpi);

                let config = PdfRenderConfig::new()
                    .set_target_width(target_w as i32)
                    .set_maximum_height(target_h as i32);

                let bitmap = page.render_with_config(&config).map_err(|e| {
                    ExtractionError::PdfRendering {
                        page: page_number,
                        reason: format!("Rendering failed: {e}"),
                    }
                })?;

                let rendered = bitmap.as_image();
                let png = encode_png(&rendered)?;
                debug!(
                    page = page_number,
                    width = rendered.width(),
                    height = rendered.height(),
                    png_size = png.len(),
                    "Rendered PDF page to PNG"
                );
                shots.push(ExtractedImage::from_bytes(
                    &png,
                    format!("page{page_number}.png"),
                    page_number,
                    rendered.dimensions(),
                    "image/png",
                    ImageKind::PageScreenshot,
                ));
            }
            Ok(shots)
        })
    }

    fn metadata(&self) -> Result<NativeMetadata, ExtractionError> {
        self.with_document(|doc| {
            let meta = doc.metadata();
            let tag = |kind: PdfDocumentMetadataTagType| {
                meta.get(kind).and_then(|t| non_empty(t.value()))
            };
            Ok(NativeMetadata {
                title: tag(PdfDocumentMetadataTagType::Title),
                author: tag(PdfDocumentMetadataTagType::Author),
                subject: tag(PdfDocumentMetadataTagType::Subject),
                creator: tag(PdfDocumentMetadataTagType::Creator),
                producer: tag(PdfDocumentMetadataTagType::Producer),
                created: tag(PdfDocumentMetadataTagType::CreationDate),
                modified: tag(PdfDocumentMetadataTagType::ModificationDate),
            })
        })
    }

    fn destroy(&mut self) -> Result<(), ExtractionError> {
        match self.bytes.take() {
            Some(_) => Ok(()),
            None => Err(ExtractionError::DocumentReleased),
        }
    }
}

/// Loader producing `PdfiumDocument`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumLoader;

impl DocumentLoader for PdfiumLoader {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn DocumentHandle>, ExtractionError> {
        Ok(Box::new(PdfiumDocument::open(bytes)?))
    }
}
