//! Table recovery: pattern detection over plain text, model-assisted
//! normalization to markdown, and image-table extraction from PDFs.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::document::{DocumentLoader, HandleGuard, ImageOptions};
use super::types::{ExtractedImage, ExtractedTable, TableCandidate, TableKind, TableSource};
use super::ExtractionError;
use crate::pipeline::vision::{VisionClient, VisionError};

/// Confidence reported for model-normalized text tables.
pub const TEXT_TABLE_CONFIDENCE: f32 = 0.9;

/// Confidence reported for tables read out of images.
pub const IMAGE_TABLE_CONFIDENCE: f32 = 0.85;

/// Embedded images at or below this many bytes are never table candidates.
const MIN_TABLE_IMAGE_BYTES: usize = 1000;

/// Image-table replies shorter than this are treated as "no table".
const MIN_IMAGE_TABLE_CHARS: usize = 10;

// ──────────────────────────────────────────────
// Detection
// ──────────────────────────────────────────────

/// `| a | b |` header, `|---|---|` separator, then any number of pipe rows.
static MARKDOWN_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\|[^\n]*\|[ \t]*\n[ \t]*\|[ \t:|-]*-{3}[ \t:|-]*(?:\n[ \t]*\|[^\n]*\|[ \t]*)*$")
        .unwrap()
});

/// Two or more consecutive lines carrying at least three tab-separated fields.
static TAB_SEPARATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[^\n\t]*\t[^\n\t]*\t[^\n]*(?:\n[^\n\t]*\t[^\n\t]*\t[^\n]*)+$").unwrap()
});

/// Two or more consecutive lines of an optional label followed by at least
/// two numeric cells separated by wide gaps.
static NUMERIC_COLUMNAR: LazyLock<Regex> = LazyLock::new(|| {
    let num = r"[-+$€£(]?\d[\d,.]*%?\)?";
    let row = format!(r"[ \t]*(?:[^\s\d][^\n]*?(?:[ ]{{2,}}|\t)[ \t]*)?{num}(?:(?:[ ]{{2,}}|\t)[ \t]*{num})+[ \t]*");
    Regex::new(&format!(r"(?m)^{row}(?:\n{row})+$")).unwrap()
});

/// Column header line, a `----`/`====` rule, then the non-blank rows below.
static HEADER_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*[^\s|][^\n]*?(?:[ ]{2,}|\t)[^\n]*\S[ \t]*\n[ \t]*[-=]{3,}[-=+ \t]*(?:\n[ \t]*\S[^\n]*)*$")
        .unwrap()
});

fn pattern_for(kind: TableKind) -> Option<&'static Regex> {
    match kind {
        TableKind::Markdown => Some(&*MARKDOWN_TABLE),
        TableKind::TabSeparated => Some(&*TAB_SEPARATED),
        TableKind::NumericColumnar => Some(&*NUMERIC_COLUMNAR),
        TableKind::HeaderSeparator => Some(&*HEADER_SEPARATOR),
        TableKind::Image | TableKind::Worksheet => None,
    }
}

fn is_separator_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3
        && (trimmed.contains("---") || trimmed.contains("==="))
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | '=' | '+' | ':' | '|' | ' ' | '\t'))
}

fn count_rows(kind: TableKind, content: &str) -> usize {
    let lines = content.lines().filter(|l| !l.trim().is_empty());
    match kind {
        TableKind::Markdown | TableKind::HeaderSeparator => {
            lines.filter(|l| !is_separator_line(l)).count()
        }
        _ => lines.count(),
    }
}

fn scan(text: &str, kinds: &[TableKind]) -> Vec<TableCandidate> {
    let mut candidates: Vec<TableCandidate> = kinds
        .iter()
        .filter_map(|kind| pattern_for(*kind).map(|re| (*kind, re)))
        .flat_map(|(kind, re)| {
            re.find_iter(text).map(move |m| TableCandidate {
                kind,
                content: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
                rows: count_rows(kind, m.as_str()),
            })
        })
        .collect();
    // Overlapping spans from different patterns are kept as separate candidates.
    candidates.sort_by(|a, b| a.start.cmp(&b.start).then(a.kind.cmp(&b.kind)));
    candidates
}

/// Run all four text detectors.
pub fn detect_candidates(text: &str) -> Vec<TableCandidate> {
    scan(
        text,
        &[
            TableKind::Markdown,
            TableKind::TabSeparated,
            TableKind::NumericColumnar,
            TableKind::HeaderSeparator,
        ],
    )
}

/// The three per-page checks used by layout analysis.
pub fn detect_page_tables(text: &str) -> Vec<TableCandidate> {
    scan(
        text,
        &[TableKind::Markdown, TableKind::TabSeparated, TableKind::NumericColumnar],
    )
}

// ──────────────────────────────────────────────
// Normalization helpers
// ──────────────────────────────────────────────

/// Strip a surrounding ``` fence if the model added one.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim()
}

/// Insert a `| --- |` row after the first line when the model omitted it.
pub fn ensure_header_separator(markdown: &str) -> String {
    let lines: Vec<&str> = markdown.lines().collect();
    let Some(first) = lines.first() else {
        return String::new();
    };
    if !first.contains('|') {
        return markdown.to_string();
    }
    if lines.get(1).is_some_and(|l| is_separator_line(l)) {
        return markdown.to_string();
    }

    let columns = first
        .trim()
        .trim_matches('|')
        .split('|')
        .count()
        .max(1);
    let separator = format!("|{}", " --- |".repeat(columns));

    let mut out = Vec::with_capacity(lines.len() + 1);
    out.push(*first);
    out.push(separator.as_str());
    out.extend(lines.iter().skip(1));
    out.join("\n")
}

/// Render rows as a markdown table; the first row becomes the header.
/// Short rows are padded, pipes and line breaks inside cells are escaped.
pub fn render_markdown_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return String::new();
    }
    let render_row = |row: &Vec<String>| {
        let mut line = String::from("|");
        for i in 0..columns {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            let cell = cell.trim().replace('|', "\\|").replace(['\r', '\n'], " ");
            line.push(' ');
            line.push_str(&cell);
            line.push_str(" |");
        }
        line
    };

    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(render_row(&rows[0]));
    out.push(format!("|{}", " --- |".repeat(columns)));
    out.extend(rows.iter().skip(1).map(render_row));
    out.join("\n")
}

fn normalization_prompt(candidate: &TableCandidate) -> String {
    format!(
        "The following text was extracted from a document and appears to be a table. \
         Convert it into a single well-formed markdown table with a header row and a \
         separator row. Keep every cell value exactly as written; do not add, infer or \
         drop data. Respond with the markdown table only.\n\n{}",
        candidate.content.trim()
    )
}

const IMAGE_TABLE_PROMPT: &str = "If this image contains a table, transcribe it as a \
markdown table with a header row and a separator row, keeping every cell value exactly \
as shown. If there is no table, respond with NO_TABLE.";

// ──────────────────────────────────────────────
// Extractor
// ──────────────────────────────────────────────

/// Confirms and normalizes table candidates through the vision client.
pub struct TableExtractor {
    vision: Arc<dyn VisionClient>,
    loader: Arc<dyn DocumentLoader>,
}

impl TableExtractor {
    pub fn new(vision: Arc<dyn VisionClient>, loader: Arc<dyn DocumentLoader>) -> Self {
        Self { vision, loader }
    }

    /// Detect and normalize every table in `text`. Candidates whose
    /// normalization fails are logged and skipped.
    pub fn extract_tables(&self, text: &str) -> Vec<ExtractedTable> {
        let candidates = detect_candidates(text);
        if candidates.is_empty() {
            return Vec::new();
        }
        tracing::debug!(candidates = candidates.len(), "Table candidates detected");

        let mut tables = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.normalize(&candidate) {
                Ok(markdown) => tables.push(ExtractedTable {
                    kind: candidate.kind,
                    content: candidate.content,
                    start: candidate.start,
                    end: candidate.end,
                    rows: candidate.rows,
                    source: TableSource::Text,
                    extracted_content: markdown,
                    confidence: TEXT_TABLE_CONFIDENCE,
                    page: None,
                }),
                Err(e) => tracing::warn!(
                    kind = ?candidate.kind,
                    start = candidate.start,
                    error = %e,
                    "Table normalization failed, skipping candidate"
                ),
            }
        }
        tables
    }

    fn normalize(&self, candidate: &TableCandidate) -> Result<String, ExtractionError> {
        let reply = self.vision.complete_text(&normalization_prompt(candidate))?;
        let markdown = strip_code_fence(&reply.content);
        if markdown.is_empty() {
            return Err(VisionError::EmptyResponse.into());
        }
        Ok(ensure_header_separator(markdown))
    }

    /// Ask the model to read tables out of embedded images larger than 1000
    /// bytes. Degenerate replies and failed calls are skipped.
    pub fn extract_image_tables(&self, images: &[ExtractedImage]) -> Vec<ExtractedTable> {
        let mut tables = Vec::new();
        for image in images.iter().filter(|img| img.size > MIN_TABLE_IMAGE_BYTES) {
            let reply = match self.vision.analyze_image(&image.data, IMAGE_TABLE_PROMPT) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(image = %image.name, page = image.page, error = %e, "Image table extraction failed");
                    continue;
                }
            };
            let markdown = strip_code_fence(&reply.content);
            if markdown.chars().count() < MIN_IMAGE_TABLE_CHARS {
                tracing::debug!(image = %image.name, "No table in image");
                continue;
            }
            let markdown = ensure_header_separator(markdown);
            tables.push(ExtractedTable {
                kind: TableKind::Image,
                content: image.name.clone(),
                start: 0,
                end: 0,
                rows: count_rows(TableKind::Markdown, &markdown),
                source: TableSource::Image,
                extracted_content: markdown,
                confidence: IMAGE_TABLE_CONFIDENCE,
                page: Some(image.page),
            });
        }
        tables
    }

    /// Standalone pass over a PDF: re-reads its text and embedded images
    /// independently of the main pipeline.
    pub fn extract_tables_from_pdf(&self, path: &Path) -> Result<Vec<ExtractedTable>, ExtractionError> {
        if !path.exists() {
            return Err(ExtractionError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let handle = HandleGuard::new(self.loader.open(bytes)?);

        let text = handle
            .get_text()?
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("\n\n");
        let images = handle.get_images(&ImageOptions {
            min_size_bytes: MIN_TABLE_IMAGE_BYTES,
        })?;
        drop(handle);

        let mut tables = self.extract_tables(&text);
        tables.extend(self.extract_image_tables(&images));
        tracing::info!(
            path = %path.display(),
            tables = tables.len(),
            "Standalone table extraction complete"
        );
        Ok(tables)
    }
}
