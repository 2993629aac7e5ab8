//! Document-handle abstraction.
//!
//! A handle is a scoped resource: opened once per parse, released exactly
//! once through `HandleGuard` on every exit path. Releasing twice is
//! reported as `DocumentReleased` and ignored by the guard.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::{ExtractedImage, ImageKind, PageText};
use super::ExtractionError;

/// Filters applied when pulling embedded images out of a document.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageOptions {
    /// Skip images whose encoded size is at or below this many bytes.
    pub min_size_bytes: usize,
}

/// Metadata the document format itself carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

/// Open document exposing text, embedded images and page renders.
pub trait DocumentHandle {
    fn page_count(&self) -> Result<usize, ExtractionError>;

    /// Native text, one entry per page in page order.
    fn get_text(&self) -> Result<Vec<PageText>, ExtractionError>;

    /// Embedded raster images, in page order.
    fn get_images(&self, options: &ImageOptions) -> Result<Vec<ExtractedImage>, ExtractionError>;

    /// One full-page PNG render per page.
    fn get_screenshots(&self, dpi: u32) -> Result<Vec<ExtractedImage>, ExtractionError>;

    fn metadata(&self) -> Result<NativeMetadata, ExtractionError>;

    /// Release the underlying parser. A second call fails with `DocumentReleased`.
    fn destroy(&mut self) -> Result<(), ExtractionError>;
}

/// Opens documents from raw bytes.
pub trait DocumentLoader: Send + Sync {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn DocumentHandle>, ExtractionError>;
}

/// Owns a handle and destroys it on drop.
pub struct HandleGuard {
    handle: Box<dyn DocumentHandle>,
}

impl HandleGuard {
    pub fn new(handle: Box<dyn DocumentHandle>) -> Self {
        Self { handle }
    }
}

impl Deref for HandleGuard {
    type Target = dyn DocumentHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl DerefMut for HandleGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut()
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        match self.handle.destroy() {
            Ok(()) => tracing::debug!("Document handle released"),
            Err(ExtractionError::DocumentReleased) => {
                tracing::debug!("Document handle was already released")
            }
            Err(e) => tracing::warn!(error = %e, "Failed to release document handle"),
        }
    }
}

// ── Mock for testing ──────────────────────────────────────

/// In-memory document used by pipeline tests without the PDFium binary.
#[derive(Clone)]
pub struct MockDocument {
    pages: Vec<String>,
    images: Vec<ExtractedImage>,
    screenshots: Option<Vec<ExtractedImage>>,
    metadata: NativeMetadata,
    text_error: Option<String>,
    released: bool,
    destroy_calls: Arc<AtomicUsize>,
}

impl MockDocument {
    pub fn new(pages: &[&str]) -> Self {
        Self {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            images: Vec::new(),
            screenshots: None,
            metadata: NativeMetadata::default(),
            text_error: None,
            released: false,
            destroy_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_images(mut self, images: Vec<ExtractedImage>) -> Self {
        self.images = images;
        self
    }

    /// Full-page renders. Without these, `get_screenshots` fails.
    pub fn with_screenshots(mut self, screenshots: Vec<ExtractedImage>) -> Self {
        self.screenshots = Some(screenshots);
        self
    }

    pub fn with_metadata(mut self, metadata: NativeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Text extraction fails with a parsing error.
    pub fn with_text_error(mut self, reason: &str) -> Self {
        self.text_error = Some(reason.to_string());
        self
    }

    /// Shared count of `destroy` calls across clones.
    pub fn destroy_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.destroy_calls)
    }

    fn ensure_open(&self) -> Result<(), ExtractionError> {
        if self.released {
            return Err(ExtractionError::DocumentReleased);
        }
        Ok(())
    }
}

impl DocumentHandle for MockDocument {
    fn page_count(&self) -> Result<usize, ExtractionError> {
        self.ensure_open()?;
        Ok(self.pages.len())
    }

    fn get_text(&self) -> Result<Vec<PageText>, ExtractionError> {
        self.ensure_open()?;
        if let Some(reason) = &self.text_error {
            return Err(ExtractionError::PdfParsing(reason.clone()));
        }
        Ok(self
            .pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: i + 1,
                text: text.clone(),
            })
            .collect())
    }

    fn get_images(&self, options: &ImageOptions) -> Result<Vec<ExtractedImage>, ExtractionError> {
        self.ensure_open()?;
        Ok(self
            .images
            .iter()
            .filter(|img| img.size > options.min_size_bytes)
            .cloned()
            .collect())
    }

    fn get_screenshots(&self, _dpi: u32) -> Result<Vec<ExtractedImage>, ExtractionError> {
        self.ensure_open()?;
        self.screenshots
            .clone()
            .ok_or_else(|| ExtractionError::PdfRendering {
                page: 0,
                reason: "mock document has no page renders".to_string(),
            })
    }

    fn metadata(&self) -> Result<NativeMetadata, ExtractionError> {
        self.ensure_open()?;
        Ok(self.metadata.clone())
    }

    fn destroy(&mut self) -> Result<(), ExtractionError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.released = true;
        Ok(())
    }
}

/// Loader handing out clones of one `MockDocument`.
pub struct MockDocumentLoader {
    document: MockDocument,
    open_error: Option<String>,
    opens: Arc<AtomicUsize>,
}

impl MockDocumentLoader {
    pub fn new(document: MockDocument) -> Self {
        Self {
            document,
            open_error: None,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every `open` fails as if the file were corrupt.
    pub fn failing(reason: &str) -> Self {
        let mut loader = Self::new(MockDocument::new(&[]));
        loader.open_error = Some(reason.to_string());
        loader
    }

    pub fn open_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }

    pub fn destroy_counter(&self) -> Arc<AtomicUsize> {
        self.document.destroy_counter()
    }
}

impl DocumentLoader for MockDocumentLoader {
    fn open(&self, _bytes: Vec<u8>) -> Result<Box<dyn DocumentHandle>, ExtractionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.open_error {
            return Err(ExtractionError::PdfParsing(reason.clone()));
        }
        Ok(Box::new(self.document.clone()))
    }
}

/// Test image whose data URL is unique per (page, tag).
pub fn mock_image(page: usize, tag: &str, size: usize, kind: ImageKind) -> ExtractedImage {
    let mut bytes = format!("{tag}-p{page}").into_bytes();
    bytes.resize(size.max(bytes.len()), 0);
    ExtractedImage::from_bytes(&bytes, format!("{tag}-{page}.png"), page, (800, 1000), "image/png", kind)
}
