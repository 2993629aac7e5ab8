//! Document processing entry point.
//!
//! Detects the document type, routes to the matching driver and wraps the
//! outcome in a `ToolResponse` envelope for the calling agent.
//!
//! Uses trait-based DI for the document loader and vision client so the
//! processor stays testable with mock implementations.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, PipelineConfig};
use crate::pipeline::extraction::pdfium::PdfiumLoader;
use crate::pipeline::extraction::{
    DocumentLoader, ExtractedTable, ParseError, ParseResult, PdfParser, SpreadsheetParser,
    WordParser,
};
use crate::pipeline::import::{DocumentTypeDetector, FileType, ImportError};
use crate::pipeline::vision::{build_vision_client, VisionClient};

/// Source-chain entries kept in `ErrorDetails::stack`.
const MAX_STACK_ENTRIES: usize = 5;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ProcessingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Import(e) => e.code(),
            Self::Parse(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// Payload handed back to the tool caller. Exactly one of `result` and
/// `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub message: String,
    pub code: String,
    pub details: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    /// Message of the innermost cause.
    pub original_message: String,
    pub code: String,
    /// Error followed by its sources, at most five entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

impl ToolError {
    pub fn from_error(err: &(dyn std::error::Error + 'static), code: &str) -> Self {
        let mut chain = vec![err.to_string()];
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        let original_message = chain.last().cloned().unwrap_or_default();
        let stack = (chain.len() > 1).then(|| {
            chain.truncate(MAX_STACK_ENTRIES);
            chain
        });

        Self {
            message: err.to_string(),
            code: code.to_string(),
            details: ErrorDetails {
                original_message,
                code: code.to_string(),
                stack,
            },
        }
    }
}

impl<T> ToolResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: ToolError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }
}

impl<T> From<Result<T, ProcessingError>> for ToolResponse<T> {
    fn from(outcome: Result<T, ProcessingError>) -> Self {
        match outcome {
            Ok(result) => Self::ok(result),
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Document processing failed");
                Self::failed(ToolError::from_error(&e, e.code()))
            }
        }
    }
}

/// Result of a standalone table pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
    pub tables: Vec<ExtractedTable>,
    pub table_count: usize,
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Routes documents to the PDF, Word or spreadsheet driver.
///
/// Pure pipeline logic: no transport, no persistence.
pub struct DocumentProcessor {
    detector: DocumentTypeDetector,
    pdf: PdfParser,
    word: WordParser,
    spreadsheet: SpreadsheetParser,
}

impl DocumentProcessor {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        vision: Arc<dyn VisionClient>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector: DocumentTypeDetector,
            word: WordParser::new(Arc::clone(&loader), Arc::clone(&vision), config.clone()),
            spreadsheet: SpreadsheetParser::new(config.clone()),
            pdf: PdfParser::new(loader, vision, config),
        }
    }

    /// Production wiring: PDFium documents and the configured vision backends.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(PdfiumLoader),
            build_vision_client(&config.vision),
            config.pipeline.clone(),
        )
    }

    /// Detect the type of `path` and run the matching driver.
    pub fn parse(&self, path: &Path) -> Result<ParseResult, ProcessingError> {
        let detected = self.detector.detect(path)?;
        let result = match detected.file_type {
            FileType::Pdf => self.pdf.parse(path)?,
            FileType::Word => self.word.parse(path)?,
            FileType::Spreadsheet => self.spreadsheet.parse(path)?,
        };
        Ok(result)
    }

    pub fn process(&self, path: &Path) -> ToolResponse<ParseResult> {
        self.parse(path).into()
    }

    /// Tables only. PDFs get the standalone text-and-image pass; other
    /// formats return the tables of a full parse.
    pub fn extract_tables(&self, path: &Path) -> Result<TableReport, ProcessingError> {
        let detected = self.detector.detect(path)?;
        let tables = match detected.file_type {
            FileType::Pdf => self
                .pdf
                .table_extractor()
                .extract_tables_from_pdf(path)
                .map_err(|e| ParseError::new(path, e))?,
            FileType::Word => self.word.parse(path)?.tables,
            FileType::Spreadsheet => self.spreadsheet.parse(path)?.tables,
        };
        Ok(TableReport {
            table_count: tables.len(),
            tables,
        })
    }

    pub fn process_tables(&self, path: &Path) -> ToolResponse<TableReport> {
        self.extract_tables(path).into()
    }
}
