//! Word-processor driver (OOXML `.docx`).
//!
//! A docx is a ZIP package of XML parts. Body text comes from
//! `word/document.xml`, metadata from `docProps/core.xml` and
//! `docProps/app.xml`, images from `word/media/`. No OCR stage.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::document::{DocumentLoader, NativeMetadata};
use super::postprocess::OcrPostProcessor;
use super::sanitize::clean_extracted_text;
use super::table_detect::{render_markdown_table, TableExtractor};
use super::types::{DocumentMetadata, ExtractedImage, ImageKind, ParseResult};
use super::{ExtractionError, ParseError};
use crate::config::PipelineConfig;
use crate::pipeline::import::{FileType, DOCX_MIME};
use crate::pipeline::vision::VisionClient;

const DOCUMENT_PART: &str = "word/document.xml";
pub(super) const CORE_PROPS_PART: &str = "docProps/core.xml";
pub(super) const APP_PROPS_PART: &str = "docProps/app.xml";
const MEDIA_PREFIX: &str = "word/media/";

pub(super) type Package = zip::ZipArchive<Cursor<Vec<u8>>>;

// ──────────────────────────────────────────────
// Body text
// ──────────────────────────────────────────────

#[derive(Default)]
struct TableBuilder {
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

impl TableBuilder {
    fn push_paragraph(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.cell.is_empty() {
            self.cell.push(' ');
        }
        self.cell.push_str(text);
    }

    /// Nested tables collapse into their parent cell as plain text.
    fn flatten(&self) -> String {
        self.rows
            .iter()
            .flatten()
            .filter(|c| !c.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run text outside any paragraph is dropped.
fn push_to(paragraphs: &mut [String], text: &str) {
    if let Some(current) = paragraphs.last_mut() {
        current.push_str(text);
    }
}

fn xml_error(e: quick_xml::Error) -> ExtractionError {
    ExtractionError::WordParsing(e.to_string())
}

/// Body text of `word/document.xml`: one block per paragraph, tables as
/// markdown. Tabs and line breaks inside runs are kept.
///
/// Paragraphs nest through text boxes, so open paragraphs form a stack. A
/// text box paragraph closes first and becomes its own block ahead of the
/// paragraph that anchors it. `mc:Fallback` subtrees repeat their
/// `mc:Choice` content and are skipped.
pub fn document_text(xml: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut blocks: Vec<String> = Vec::new();
    let mut tables: Vec<TableBuilder> = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut in_text = false;
    let mut fallback_depth = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        if fallback_depth > 0 {
            match &event {
                Event::Start(e) if e.local_name().as_ref() == b"Fallback" => fallback_depth += 1,
                Event::End(e) if e.local_name().as_ref() == b"Fallback" => fallback_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Fallback" => fallback_depth = 1,
                b"p" => paragraphs.push(String::new()),
                b"t" => in_text = true,
                b"tab" => push_to(&mut paragraphs, "\t"),
                b"br" | b"cr" => push_to(&mut paragraphs, "\n"),
                b"tbl" => tables.push(TableBuilder::default()),
                b"tr" => {
                    if let Some(table) = tables.last_mut() {
                        table.row.clear();
                    }
                }
                b"tc" => {
                    if let Some(table) = tables.last_mut() {
                        table.cell.clear();
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => push_to(&mut paragraphs, "\t"),
                b"br" | b"cr" => push_to(&mut paragraphs, "\n"),
                b"tc" => {
                    if let Some(table) = tables.last_mut() {
                        table.row.push(String::new());
                    }
                }
                _ => {}
            },
            Event::Text(t) if in_text => {
                push_to(&mut paragraphs, &t.unescape().map_err(xml_error)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = paragraphs.pop().unwrap_or_default();
                    match tables.last_mut() {
                        Some(table) => table.push_paragraph(&paragraph),
                        None if !paragraph.trim().is_empty() => {
                            blocks.push(paragraph.trim_end().to_string());
                        }
                        None => {}
                    }
                }
                b"tc" => {
                    if let Some(table) = tables.last_mut() {
                        let cell = std::mem::take(&mut table.cell);
                        table.row.push(cell);
                    }
                }
                b"tr" => {
                    if let Some(table) = tables.last_mut() {
                        let row = std::mem::take(&mut table.row);
                        table.rows.push(row);
                    }
                }
                b"tbl" => {
                    if let Some(table) = tables.pop() {
                        match tables.last_mut() {
                            Some(parent) => parent.push_paragraph(&table.flatten()),
                            None => {
                                let rendered = render_markdown_table(&table.rows);
                                if !rendered.is_empty() {
                                    blocks.push(rendered);
                                }
                            }
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(blocks.join("\n\n"))
}

// ──────────────────────────────────────────────
// Metadata
// ──────────────────────────────────────────────

/// Text content of every leaf element, keyed by local name. First
/// occurrence wins.
fn leaf_values(xml: &str) -> Result<HashMap<String, String>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut values = HashMap::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Text(t) => {
                if let Some(name) = current.take() {
                    let value = t.unescape().map_err(xml_error)?.trim().to_string();
                    if !value.is_empty() {
                        values.entry(name).or_insert(value);
                    }
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(values)
}

/// Core (`dc:*`, `dcterms:*`) and extended (`Application`, `Pages`)
/// properties. Returns the native metadata and the stored page count.
pub fn package_metadata(
    core_xml: Option<&str>,
    app_xml: Option<&str>,
) -> Result<(NativeMetadata, Option<usize>), ExtractionError> {
    let mut native = NativeMetadata::default();
    if let Some(xml) = core_xml {
        let mut core = leaf_values(xml)?;
        native.title = core.remove("title");
        native.author = core.remove("creator");
        native.subject = core.remove("subject");
        native.created = core.remove("created");
        native.modified = core.remove("modified");
    }

    let mut pages = None;
    if let Some(xml) = app_xml {
        let mut app = leaf_values(xml)?;
        native.creator = app.remove("Application");
        pages = app.remove("Pages").and_then(|p| p.parse::<usize>().ok());
    }
    Ok((native, pages))
}

// ──────────────────────────────────────────────
// Package access
// ──────────────────────────────────────────────

pub(super) fn read_part(package: &mut Package, name: &str) -> Result<Option<String>, ExtractionError> {
    let mut file = match package.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

fn media_images(package: &mut Package) -> Vec<ExtractedImage> {
    let names: Vec<String> = package
        .file_names()
        .filter(|n| n.starts_with(MEDIA_PREFIX))
        .map(str::to_string)
        .collect();

    let mut images = Vec::new();
    for name in names {
        let Some(mime) = mime_guess::from_path(&name).first_raw() else {
            continue;
        };
        if !mime.starts_with("image/") {
            continue;
        }
        let mut bytes = Vec::new();
        let read = package
            .by_name(&name)
            .map_err(ExtractionError::from)
            .and_then(|mut f| f.read_to_end(&mut bytes).map_err(ExtractionError::from));
        if let Err(e) = read {
            tracing::warn!(image = %name, error = %e, "Embedded media unreadable, skipping");
            continue;
        }
        let dimensions = image::io::Reader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .ok()
            .and_then(|r| r.into_dimensions().ok())
            .unwrap_or((0, 0));
        let short_name = name.trim_start_matches(MEDIA_PREFIX).to_string();
        images.push(ExtractedImage::from_bytes(
            &bytes,
            short_name,
            1,
            dimensions,
            mime,
            ImageKind::Embedded,
        ));
    }
    images
}

// ──────────────────────────────────────────────
// Driver
// ──────────────────────────────────────────────

/// Word-processor driver. Text tables go through the shared Table
/// Extractor; cleanup is mechanical only.
pub struct WordParser {
    tables: TableExtractor,
    post: OcrPostProcessor,
    config: PipelineConfig,
}

impl WordParser {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        vision: Arc<dyn VisionClient>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            tables: TableExtractor::new(Arc::clone(&vision), loader),
            post: OcrPostProcessor::new(vision),
            config,
        }
    }

    pub fn parse(&self, path: &Path) -> Result<ParseResult, ParseError> {
        let _span = tracing::info_span!("parse_docx", path = %path.display()).entered();
        self.parse_inner(path)
            .map_err(|e| ParseError::new(path, e))
    }

    fn parse_inner(&self, path: &Path) -> Result<ParseResult, ExtractionError> {
        let start = Instant::now();
        if !path.exists() {
            return Err(ExtractionError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let mut metadata = DocumentMetadata::for_file(path, &bytes, FileType::Word, DOCX_MIME);

        let mut package = zip::ZipArchive::new(Cursor::new(bytes))?;
        let body = read_part(&mut package, DOCUMENT_PART)?.ok_or_else(|| {
            ExtractionError::WordParsing(format!("missing {DOCUMENT_PART}"))
        })?;
        let raw_text = clean_extracted_text(&document_text(&body)?);

        let core = read_part(&mut package, CORE_PROPS_PART)?;
        let app = read_part(&mut package, APP_PROPS_PART)?;
        let stored_pages = match package_metadata(core.as_deref(), app.as_deref()) {
            Ok((native, pages)) => {
                metadata.apply_native(native);
                pages
            }
            Err(e) => {
                tracing::warn!(error = %e, "Document properties unreadable");
                None
            }
        };
        let pages = stored_pages.unwrap_or(1).max(1);
        metadata.page_count = pages;

        let images = media_images(&mut package);

        let post = self.post.process_ocr_text(&raw_text, None, false);
        let text = if post.success {
            post.processed_text.clone()
        } else {
            raw_text.trim().to_string()
        };

        let tables = if self.config.skip_table_extraction {
            tracing::info!("Table extraction disabled");
            Vec::new()
        } else {
            self.tables.extract_tables(&raw_text)
        };

        metadata.set_text_stats(&text);
        tracing::info!(
            pages,
            images = images.len(),
            tables = tables.len(),
            text_len = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Word parse complete"
        );

        Ok(ParseResult {
            success: true,
            text,
            pages,
            metadata,
            images,
            is_image_based: false,
            ocr_applied: false,
            ocr_source: None,
            layout_analysis: None,
            ocr_post_processing: Some(post),
            table_count: tables.len(),
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::document::{MockDocument, MockDocumentLoader};
    use crate::pipeline::extraction::types::TableKind;
    use crate::pipeline::vision::MockVisionClient;
    use std::io::Write;

    const W: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn body(inner: &str) -> String {
        format!(r#"<?xml version="1.0" encoding="UTF-8"?><w:document {W}><w:body>{inner}</w:body></w:document>"#)
    }

    fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn cell(text: &str) -> String {
        format!("<w:tc>{}</w:tc>", para(text))
    }

    const CORE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/">
  <dc:title>Supplier Review</dc:title>
  <dc:creator>Dana Ortiz</dc:creator>
  <dc:subject>Procurement</dc:subject>
  <dcterms:created>2024-03-01T09:00:00Z</dcterms:created>
  <dcterms:modified>2024-03-02T17:30:00Z</dcterms:modified>
</cp:coreProperties>"#;

    const APP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">
  <Application>Microsoft Office Word</Application>
  <Pages>3</Pages>
</Properties>"#;

    fn write_docx(parts: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".docx").tempfile().unwrap();
        let mut zip = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, data) in parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        file
    }

    fn parser(vision: MockVisionClient, config: PipelineConfig) -> WordParser {
        WordParser::new(
            Arc::new(MockDocumentLoader::new(MockDocument::new(&[]))),
            Arc::new(vision),
            config,
        )
    }

    // --- body text ---

    #[test]
    fn paragraphs_in_order_with_tabs_and_breaks() {
        let xml = body(
            "<w:p><w:r><w:t>Name:</w:t><w:tab/><w:t>Value</w:t></w:r></w:p>\
             <w:p><w:r><w:t>line one</w:t><w:br/><w:t>line two</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t xml:space=\"preserve\">Fish &amp; chips</w:t></w:r></w:p>",
        );
        let text = document_text(&xml).unwrap();
        assert_eq!(text, "Name:\tValue\n\nline one\nline two\n\nFish & chips");
    }

    #[test]
    fn runs_in_one_paragraph_concatenate() {
        let xml = body("<w:p><w:r><w:t>Hel</w:t></w:r><w:r><w:t>lo</w:t></w:r></w:p>");
        assert_eq!(document_text(&xml).unwrap(), "Hello");
    }

    #[test]
    fn tables_render_as_markdown() {
        let xml = body(&format!(
            "{}<w:tbl><w:tr>{}{}</w:tr><w:tr>{}{}</w:tr></w:tbl>{}",
            para("Before"),
            cell("Item"),
            cell("Qty"),
            cell("Bolts"),
            cell("40"),
            para("After"),
        ));
        let text = document_text(&xml).unwrap();
        assert_eq!(
            text,
            "Before\n\n| Item | Qty |\n| --- | --- |\n| Bolts | 40 |\n\nAfter"
        );
    }

    #[test]
    fn nested_table_flattens_into_cell() {
        let inner = format!("<w:tbl><w:tr>{}{}</w:tr></w:tbl>", cell("x"), cell("y"));
        let xml = body(&format!(
            "<w:tbl><w:tr>{}{}</w:tr><w:tr><w:tc>{inner}</w:tc>{}</w:tr></w:tbl>",
            cell("A"),
            cell("B"),
            cell("z"),
        ));
        let text = document_text(&xml).unwrap();
        assert_eq!(text, "| A | B |\n| --- | --- |\n| x y | z |");
    }

    #[test]
    fn text_box_keeps_anchor_paragraph_text() {
        let xml = body(
            "<w:p><w:r><w:t xml:space=\"preserve\">Before </w:t></w:r>\
             <w:r><w:drawing><w:txbxContent>\
             <w:p><w:r><w:t>Inside box</w:t></w:r></w:p>\
             </w:txbxContent></w:drawing></w:r>\
             <w:r><w:t>After</w:t></w:r></w:p>",
        );
        assert_eq!(document_text(&xml).unwrap(), "Inside box\n\nBefore After");
    }

    #[test]
    fn text_box_fallback_copy_is_skipped() {
        let boxed = para("Callout");
        let xml = body(&format!(
            "<w:p><w:r><w:t>Lead</w:t></w:r><w:r><mc:AlternateContent>\
             <mc:Choice Requires=\"wps\"><w:txbxContent>{boxed}</w:txbxContent></mc:Choice>\
             <mc:Fallback><w:pict><w:txbxContent>{boxed}</w:txbxContent></w:pict></mc:Fallback>\
             </mc:AlternateContent></w:r></w:p>{}",
            para("Next")
        ));
        assert_eq!(document_text(&xml).unwrap(), "Callout\n\nLead\n\nNext");
    }

    #[test]
    fn malformed_xml_is_word_parsing_error() {
        let err = document_text("<w:document><w:body></w:p></w:document>").unwrap_err();
        assert_eq!(err.code(), "WORD_PARSE_FAILED");
    }

    // --- metadata ---

    #[test]
    fn core_and_app_properties() {
        let (native, pages) = package_metadata(Some(CORE), Some(APP)).unwrap();
        assert_eq!(native.title.as_deref(), Some("Supplier Review"));
        assert_eq!(native.author.as_deref(), Some("Dana Ortiz"));
        assert_eq!(native.subject.as_deref(), Some("Procurement"));
        assert_eq!(native.created.as_deref(), Some("2024-03-01T09:00:00Z"));
        assert_eq!(native.modified.as_deref(), Some("2024-03-02T17:30:00Z"));
        assert_eq!(native.creator.as_deref(), Some("Microsoft Office Word"));
        assert_eq!(pages, Some(3));
    }

    #[test]
    fn missing_property_parts_are_empty() {
        let (native, pages) = package_metadata(None, None).unwrap();
        assert_eq!(native, NativeMetadata::default());
        assert_eq!(pages, None);
    }

    // --- driver ---

    #[test]
    fn parse_docx_end_to_end() {
        let xml = body(&format!(
            "{}<w:tbl><w:tr>{}{}</w:tr><w:tr>{}{}</w:tr></w:tbl>",
            para("Quarterly   supplier summary"),
            cell("Item"),
            cell("Qty"),
            cell("Bolts"),
            cell("40"),
        ));
        let file = write_docx(&[
            ("[Content_Types].xml", b"<Types/>"),
            (DOCUMENT_PART, xml.as_bytes()),
            (CORE_PROPS_PART, CORE.as_bytes()),
            (APP_PROPS_PART, APP.as_bytes()),
            ("word/media/image1.png", &[0x89, b'P', b'N', b'G', 0, 1, 2, 3]),
            ("word/media/notes.bin", b"not an image"),
        ]);
        let vision = MockVisionClient::new("| Item | Qty |\n|---|---|\n| Bolts | 40 |");
        let calls = vision.call_counter();

        let result = parser(vision, PipelineConfig::default()).parse(file.path()).unwrap();

        assert!(result.success);
        assert!(!result.ocr_applied);
        assert!(!result.is_image_based);
        assert!(result.layout_analysis.is_none());
        assert_eq!(result.pages, 3);
        assert!(result.text.starts_with("Quarterly supplier summary"), "{}", result.text);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.table_count, 1);
        assert_eq!(result.tables[0].kind, TableKind::Markdown);
        assert_eq!(calls.get(), 1);
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].name, "image1.png");
        assert_eq!(result.images[0].mime_type, "image/png");
        assert_eq!(result.metadata.title.as_deref(), Some("Supplier Review"));
        assert_eq!(result.metadata.file_type, Some(FileType::Word));
        assert_eq!(result.metadata.mime_type, DOCX_MIME);
        let post = result.ocr_post_processing.unwrap();
        assert!(!post.processing_steps.contains(&"ai-refinement".to_string()));
    }

    #[test]
    fn skip_tables_makes_no_model_calls() {
        let xml = body(&format!("<w:tbl><w:tr>{}{}</w:tr></w:tbl>", cell("a"), cell("b")));
        let file = write_docx(&[(DOCUMENT_PART, xml.as_bytes())]);
        let vision = MockVisionClient::new("unused");
        let calls = vision.call_counter();
        let config = PipelineConfig {
            skip_table_extraction: true,
            ..PipelineConfig::default()
        };

        let result = parser(vision, config).parse(file.path()).unwrap();
        assert!(result.tables.is_empty());
        assert_eq!(calls.get(), 0);
        assert_eq!(result.pages, 1);
    }

    #[test]
    fn missing_document_part_fails() {
        let file = write_docx(&[("xl/workbook.xml", b"<workbook/>")]);
        let err = parser(MockVisionClient::new("x"), PipelineConfig::default())
            .parse(file.path())
            .unwrap_err();
        assert_eq!(err.code(), "WORD_PARSE_FAILED");
    }

    #[test]
    fn not_a_zip_is_archive_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"plain text, not a package").unwrap();
        let err = parser(MockVisionClient::new("x"), PipelineConfig::default())
            .parse(file.path())
            .unwrap_err();
        assert_eq!(err.code(), "ARCHIVE_ERROR");
    }
}
