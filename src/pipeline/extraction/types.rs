use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::NativeMetadata;
use crate::pipeline::import::{content_hash, FileType};

// ──────────────────────────────────────────────
// Final result
// ──────────────────────────────────────────────

/// Result of parsing a single document. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub success: bool,
    pub text: String,
    pub pages: usize,
    pub metadata: DocumentMetadata,
    pub images: Vec<ExtractedImage>,
    pub is_image_based: bool,
    pub ocr_applied: bool,
    /// Backend and model that recognized the text, e.g. `"cloud:glm-4.5v"`.
    pub ocr_source: Option<String>,
    pub layout_analysis: Option<LayoutAnalysis>,
    pub ocr_post_processing: Option<PostProcessingResult>,
    pub tables: Vec<ExtractedTable>,
    pub table_count: usize,
}

/// Document-level metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub document_id: Uuid,
    pub file_name: String,
    pub file_type: Option<FileType>,
    pub mime_type: String,
    pub file_size: u64,
    /// Base64 SHA-256 of the file bytes.
    pub content_hash: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub page_count: usize,
    pub word_count: usize,
    pub character_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sheet_names: Vec<String>,
    /// RFC 3339 timestamp of this parse.
    pub parsed_at: String,
}

impl DocumentMetadata {
    /// File-level fields: identity, size, hash and parse timestamp.
    pub fn for_file(path: &Path, bytes: &[u8], file_type: FileType, mime_type: &str) -> Self {
        Self {
            document_id: Uuid::new_v4(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_type: Some(file_type),
            mime_type: mime_type.to_string(),
            file_size: bytes.len() as u64,
            content_hash: content_hash(bytes),
            parsed_at: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    pub fn apply_native(&mut self, native: NativeMetadata) {
        self.title = native.title;
        self.author = native.author;
        self.subject = native.subject;
        self.creator = native.creator;
        self.producer = native.producer;
        self.created = native.created;
        self.modified = native.modified;
    }

    pub fn set_text_stats(&mut self, text: &str) {
        self.word_count = text.split_whitespace().count();
        self.character_count = text.chars().count();
    }
}

// ──────────────────────────────────────────────
// Raw extraction
// ──────────────────────────────────────────────

/// Native text of one page (1-based page number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageKind {
    /// Raster object embedded in the document.
    Embedded,
    /// Full-page render produced for recognition.
    PageScreenshot,
}

/// Image pulled out of a document, carried inline as a data URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedImage {
    /// `data:<mime>;base64,<payload>`
    pub data: String,
    pub name: String,
    /// 1-based page the image belongs to.
    pub page: usize,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    /// Encoded size in bytes (before base64).
    pub size: usize,
    pub kind: ImageKind,
}

// ──────────────────────────────────────────────
// Layout analysis
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureType {
    StructuredDocument,
    ImageHeavyDocument,
    TextDenseDocument,
    MixedDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageLayoutType {
    ImageHeavy,
    SparseText,
    TextDense,
    Fragmented,
    Balanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    pub length: usize,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegion {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLayout {
    pub page_number: usize,
    pub text_blocks: Vec<TextBlock>,
    pub images: Vec<ImageRegion>,
    pub tables: Vec<TableCandidate>,
    pub total_text_length: usize,
    pub estimated_layout_type: PageLayoutType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSummary {
    pub total_text_blocks: usize,
    pub total_images: usize,
    pub total_tables: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutAnalysis {
    pub success: bool,
    pub pages: Vec<PageLayout>,
    pub total_pages: usize,
    pub layout_summary: LayoutSummary,
    pub structure_type: StructureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LayoutAnalysis {
    /// Analysis that could not be performed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            pages: Vec::new(),
            total_pages: 0,
            layout_summary: LayoutSummary::default(),
            structure_type: StructureType::MixedDocument,
            error: Some(error.into()),
        }
    }
}

// ──────────────────────────────────────────────
// Tables
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Markdown,
    TabSeparated,
    NumericColumnar,
    HeaderSeparator,
    Image,
    Worksheet,
}

/// Text span pattern-matched as probably tabular.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCandidate {
    #[serde(rename = "type")]
    pub kind: TableKind,
    pub content: String,
    /// Byte offsets into the scanned text.
    pub start: usize,
    pub end: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    Text,
    Image,
}

/// A candidate confirmed and normalized into a markdown table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTable {
    #[serde(rename = "type")]
    pub kind: TableKind,
    /// Raw matched text (or image name for image tables).
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub rows: usize,
    pub source: TableSource,
    /// Normalized markdown.
    pub extracted_content: String,
    /// Fixed per-source heuristic, not a calibrated probability.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

// ──────────────────────────────────────────────
// Recognition and refinement
// ──────────────────────────────────────────────

/// Output of the page-recognition stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrOutput {
    /// Labeled page blocks joined in page order.
    pub text: String,
    /// Recognized body per page, one entry per page number, in page order.
    pub pages: Vec<PageText>,
    /// Backend that served the first successful page.
    pub source: String,
    pub model: String,
    pub pages_processed: usize,
    pub pages_failed: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessingResult {
    pub success: bool,
    pub processed_text: String,
    pub improvements: Vec<String>,
    /// Heuristic in [0, 1].
    pub confidence: f32,
    pub processing_steps: Vec<String>,
}

/// Join page bodies as `--- Page N ---` blocks in the given order.
pub fn label_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| format!("--- Page {} ---\n{}", p.page_number, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl ExtractedImage {
    /// Wrap encoded image bytes as an inline data URL.
    pub fn from_bytes(
        bytes: &[u8],
        name: impl Into<String>,
        page: usize,
        (width, height): (u32, u32),
        mime_type: &str,
        kind: ImageKind,
    ) -> Self {
        Self {
            data: crate::pipeline::vision::to_data_url(mime_type, bytes),
            name: name.into(),
            page,
            width,
            height,
            mime_type: mime_type.to_string(),
            size: bytes.len(),
            kind,
        }
    }
}
