pub mod types;
pub mod document;
pub mod pdfium;
pub mod sanitize;
pub mod layout;
pub mod table_detect;
pub mod postprocess;
pub mod prompts;
pub mod orchestrator;
pub mod docx;
pub mod xlsx;

pub use types::*;
pub use document::*;
pub use sanitize::*;
pub use layout::*;
pub use table_detect::*;
pub use postprocess::*;
pub use orchestrator::*;
pub use docx::*;
pub use xlsx::*;

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::vision::VisionError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF is password-protected or encrypted")]
    PdfEncrypted,

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDFium library unavailable: {0}")]
    PdfiumUnavailable(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Document handle already released")]
    DocumentReleased,

    #[error("Word document parsing failed: {0}")]
    WordParsing(String),

    #[error("Spreadsheet parsing failed: {0}")]
    SpreadsheetParsing(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),
}

impl ExtractionError {
    /// Stable classification code for response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::PdfParsing(_) => "PDF_PARSE_FAILED",
            Self::PdfEncrypted => "PDF_ENCRYPTED",
            Self::PdfRendering { .. } => "PDF_RENDER_FAILED",
            Self::PdfiumUnavailable(_) => "PDFIUM_UNAVAILABLE",
            Self::ImageProcessing(_) => "IMAGE_PROCESSING_FAILED",
            Self::DocumentReleased => "DOCUMENT_RELEASED",
            Self::WordParsing(_) => "WORD_PARSE_FAILED",
            Self::SpreadsheetParsing(_) => "SPREADSHEET_PARSE_FAILED",
            Self::Archive(_) => "ARCHIVE_ERROR",
            Self::Vision(e) => e.code(),
        }
    }
}

/// Parse-level failure: the document could not be opened or read at all.
#[derive(Error, Debug)]
#[error("Failed to parse {}: {source}", .path.display())]
pub struct ParseError {
    pub path: PathBuf,
    #[source]
    pub source: ExtractionError,
}

impl ParseError {
    pub fn new(path: impl Into<PathBuf>, source: ExtractionError) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        self.source.code()
    }
}
