//! Spreadsheet driver (`.xlsx` and legacy `.xls`).
//!
//! Every sheet becomes a `## Sheet: <name>` section holding one markdown
//! table. Cell grids are already structured, so each non-empty sheet is
//! reported as a worksheet table without a model call.

use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::Timelike;

use super::docx::{package_metadata, read_part, APP_PROPS_PART, CORE_PROPS_PART};
use super::table_detect::render_markdown_table;
use super::types::{DocumentMetadata, ExtractedTable, ParseResult, TableKind, TableSource};
use super::{ExtractionError, ParseError};
use crate::config::PipelineConfig;
use crate::pipeline::import::{FileType, XLSX_MIME, XLS_MIME};

const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];

/// Display form of one cell. Dates use ISO 8601, whole-day dates drop
/// the time part.
pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.num_seconds_from_midnight() == 0 => ts.format("%Y-%m-%d").to_string(),
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{e:?}"),
    }
}

/// Non-empty rows of a sheet as display strings, trailing empty columns
/// dropped.
pub fn sheet_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    range
        .rows()
        .map(|row| {
            let mut cells: Vec<String> = row.iter().map(cell_text).collect();
            while cells.last().is_some_and(|c| c.trim().is_empty()) {
                cells.pop();
            }
            cells
        })
        .filter(|cells| !cells.is_empty())
        .collect()
}

/// Spreadsheet driver. No OCR, no model calls.
pub struct SpreadsheetParser {
    config: PipelineConfig,
}

impl SpreadsheetParser {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn parse(&self, path: &Path) -> Result<ParseResult, ParseError> {
        let _span = tracing::info_span!("parse_spreadsheet", path = %path.display()).entered();
        self.parse_inner(path)
            .map_err(|e| ParseError::new(path, e))
    }

    fn parse_inner(&self, path: &Path) -> Result<ParseResult, ExtractionError> {
        let start = Instant::now();
        if !path.exists() {
            return Err(ExtractionError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let is_ooxml = bytes.starts_with(ZIP_MAGIC);
        let mime = if is_ooxml { XLSX_MIME } else { XLS_MIME };
        let mut metadata = DocumentMetadata::for_file(path, &bytes, FileType::Spreadsheet, mime);
        if is_ooxml {
            read_package_properties(bytes, &mut metadata);
        }

        let mut workbook = open_workbook_auto(path)
            .map_err(|e| ExtractionError::SpreadsheetParsing(e.to_string()))?;
        let sheet_names = workbook.sheet_names();

        let mut sections = Vec::with_capacity(sheet_names.len());
        let mut tables = Vec::new();
        let mut offset = 0;
        for (index, name) in sheet_names.iter().enumerate() {
            let range = workbook
                .worksheet_range(name)
                .map_err(|e| ExtractionError::SpreadsheetParsing(format!("sheet '{name}': {e}")))?;
            let rows = sheet_rows(&range);
            let heading = format!("## Sheet: {name}");
            let markdown = render_markdown_table(&rows);

            // Offsets account for the "\n\n" joining sections.
            if index > 0 {
                offset += 2;
            }
            let section = if markdown.is_empty() {
                heading
            } else {
                let table_start = offset + heading.len() + 2;
                if !self.config.skip_table_extraction {
                    tables.push(ExtractedTable {
                        kind: TableKind::Worksheet,
                        content: markdown.clone(),
                        start: table_start,
                        end: table_start + markdown.len(),
                        rows: rows.len(),
                        source: TableSource::Text,
                        extracted_content: markdown.clone(),
                        confidence: 1.0,
                        page: Some(index + 1),
                    });
                }
                format!("{heading}\n\n{markdown}")
            };
            tracing::debug!(sheet = %name, rows = rows.len(), "Sheet rendered");
            offset += section.len();
            sections.push(section);
        }

        let text = sections.join("\n\n");
        metadata.page_count = sheet_names.len();
        metadata.set_text_stats(&text);
        metadata.sheet_names = sheet_names;

        tracing::info!(
            sheets = metadata.sheet_names.len(),
            tables = tables.len(),
            text_len = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Spreadsheet parse complete"
        );

        Ok(ParseResult {
            success: true,
            text,
            pages: metadata.page_count,
            metadata,
            images: Vec::new(),
            is_image_based: false,
            ocr_applied: false,
            ocr_source: None,
            layout_analysis: None,
            ocr_post_processing: None,
            table_count: tables.len(),
            tables,
        })
    }
}

/// Title, author and dates from the OOXML property parts. Absent or
/// unreadable parts leave the fields empty.
fn read_package_properties(bytes: Vec<u8>, metadata: &mut DocumentMetadata) {
    let result = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(ExtractionError::from)
        .and_then(|mut package| {
            let core = read_part(&mut package, CORE_PROPS_PART)?;
            let app = read_part(&mut package, APP_PROPS_PART)?;
            package_metadata(core.as_deref(), app.as_deref())
        });
    match result {
        Ok((native, _)) => metadata.apply_native(native),
        Err(e) => tracing::warn!(error = %e, "Workbook properties unreadable"),
    }
}
