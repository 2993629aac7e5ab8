//! PDF driver: text extraction, image-density classification, layout
//! analysis, conditional OCR, post-processing and table extraction.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::document::{DocumentLoader, HandleGuard, ImageOptions};
use super::layout::LayoutAnalyzer;
use super::postprocess::OcrPostProcessor;
use super::prompts::build_ocr_prompt;
use super::sanitize::clean_extracted_text;
use super::table_detect::TableExtractor;
use super::types::{
    label_pages, DocumentMetadata, ExtractedImage, LayoutAnalysis, OcrOutput, PageText,
    ParseResult, StructureType,
};
use super::{ExtractionError, ParseError};
use crate::config::PipelineConfig;
use crate::pipeline::import::FileType;
use crate::pipeline::vision::{VisionClient, VisionError, VisionReply};

/// Whether a document needs visual recognition.
///
/// Requires at least one embedded image, and either too little native text
/// or an image-heavy layout. Classification is per document, not per page.
pub fn is_image_based(
    image_count: usize,
    cleaned_text_len: usize,
    structure: Option<StructureType>,
    min_text_length: usize,
) -> bool {
    image_count > 0
        && (cleaned_text_len < min_text_length
            || structure == Some(StructureType::ImageHeavyDocument))
}

/// Sequences the extraction stages for one PDF. Holds no per-document
/// state, so one parser serves any number of parses.
pub struct PdfParser {
    loader: Arc<dyn DocumentLoader>,
    vision: Arc<dyn VisionClient>,
    layout: LayoutAnalyzer,
    tables: TableExtractor,
    post: OcrPostProcessor,
    config: PipelineConfig,
}

impl PdfParser {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        vision: Arc<dyn VisionClient>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            layout: LayoutAnalyzer::new(Arc::clone(&loader)),
            tables: TableExtractor::new(Arc::clone(&vision), Arc::clone(&loader)),
            post: OcrPostProcessor::new(Arc::clone(&vision)),
            loader,
            vision,
            config,
        }
    }

    pub fn table_extractor(&self) -> &TableExtractor {
        &self.tables
    }

    /// Parse the PDF at `path`. Only failures to open or read the file are
    /// fatal; every later stage degrades instead of failing the parse.
    pub fn parse(&self, path: &Path) -> Result<ParseResult, ParseError> {
        let _span = tracing::info_span!("parse_pdf", path = %path.display()).entered();
        self.parse_inner(path)
            .map_err(|e| ParseError::new(path, e))
    }

    fn parse_inner(&self, path: &Path) -> Result<ParseResult, ExtractionError> {
        let start = Instant::now();
        if !path.exists() {
            return Err(ExtractionError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let mut metadata = DocumentMetadata::for_file(path, &bytes, FileType::Pdf, "application/pdf");

        // Released on every exit path below, including `?` returns.
        let handle = HandleGuard::new(self.loader.open(bytes)?);

        // Step 1: raw text and embedded images
        let pages = handle.get_text()?;
        let images = handle
            .get_images(&ImageOptions::default())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Embedded image extraction failed, continuing without images");
                Vec::new()
            });
        match handle.metadata() {
            Ok(native) => metadata.apply_native(native),
            Err(e) => tracing::warn!(error = %e, "PDF metadata unreadable"),
        }
        metadata.page_count = pages.len();

        let native_text = clean_extracted_text(
            &pages
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        );
        tracing::info!(
            pages = pages.len(),
            text_len = native_text.len(),
            images = images.len(),
            "Native extraction complete"
        );

        // Step 2: layout, non-fatal
        let layout = self.layout.analyze_document(path);
        let layout_ctx = layout.success.then_some(&layout);
        if layout_ctx.is_none() {
            tracing::warn!(
                error = layout.error.as_deref().unwrap_or("unknown"),
                "Proceeding without layout context"
            );
        }

        // Step 3: classification
        let image_based = is_image_based(
            images.len(),
            native_text.chars().count(),
            layout_ctx.map(|l| l.structure_type),
            self.config.min_text_length,
        );

        // Step 4: OCR page sources are gathered before the handle is released.
        let page_images = if image_based {
            match handle.get_screenshots(self.config.render_dpi) {
                Ok(shots) if !shots.is_empty() => shots,
                Ok(_) => images.clone(),
                Err(e) => {
                    tracing::warn!(error = %e, "Page screenshots unavailable, using embedded images");
                    images.clone()
                }
            }
        } else {
            Vec::new()
        };
        drop(handle);

        let ocr = if image_based {
            match self.run_ocr(&page_images, layout_ctx) {
                Ok(output) => Some(output),
                Err(e) => {
                    tracing::warn!(error = %e, "OCR failed on every page, keeping native text");
                    None
                }
            }
        } else {
            None
        };

        // Step 5: post-processing. OCR output is refined page by page so the
        // page labels survive.
        let (raw_text, post) = match &ocr {
            Some(output) => (
                output.text.as_str(),
                self.post.process_ocr_pages(&output.pages, layout_ctx),
            ),
            None => (
                native_text.as_str(),
                self.post.process_ocr_text(&native_text, layout_ctx, false),
            ),
        };
        let text = if post.success {
            post.processed_text.clone()
        } else {
            raw_text.trim().to_string()
        };

        // Step 6: tables, on pre-cleanup text so column gaps survive
        let tables = if self.config.skip_table_extraction {
            tracing::info!("Table extraction disabled");
            Vec::new()
        } else {
            self.tables.extract_tables(raw_text)
        };

        // Step 7: assembly
        metadata.set_text_stats(&text);
        let ocr_applied = ocr.is_some();
        let ocr_source = ocr.as_ref().map(|o| format!("{}:{}", o.source, o.model));

        tracing::info!(
            image_based,
            ocr_applied,
            tables = tables.len(),
            text_len = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "PDF parse complete"
        );

        Ok(ParseResult {
            success: true,
            text,
            pages: pages.len(),
            metadata,
            images,
            is_image_based: image_based,
            ocr_applied,
            ocr_source,
            layout_analysis: Some(layout),
            ocr_post_processing: Some(post),
            table_count: tables.len(),
            tables,
        })
    }

    /// Recognize each page image and join the results in page order.
    /// Succeeds if at least one page was recognized.
    fn run_ocr(
        &self,
        page_images: &[ExtractedImage],
        layout: Option<&LayoutAnalysis>,
    ) -> Result<OcrOutput, ExtractionError> {
        if page_images.is_empty() {
            return Err(ExtractionError::ImageProcessing(
                "no page images to recognize".to_string(),
            ));
        }
        self.vision.initialize()?;

        let prompt = build_ocr_prompt(layout);
        let start = Instant::now();
        let mut results = if self.config.ocr_concurrency > 1 {
            recognize_pooled(self.vision.as_ref(), page_images, &prompt, self.config.ocr_concurrency)
        } else {
            page_images
                .iter()
                .enumerate()
                .map(|(i, image)| (i, recognize_page(self.vision.as_ref(), image, &prompt)))
                .collect()
        };
        // Completion order never leaks into the output.
        results.sort_by_key(|(i, _)| (page_images[*i].page, *i));

        // Several images on one page share a single labeled block.
        let mut pages: Vec<PageText> = Vec::new();
        let mut pages_failed = Vec::new();
        let mut served_by: Option<VisionReply> = None;
        let mut last_error: Option<VisionError> = None;
        for (i, outcome) in results {
            let page = page_images[i].page;
            match outcome {
                Ok(reply) => {
                    let body = reply.content.trim();
                    match pages.last_mut() {
                        Some(last) if last.page_number == page => {
                            last.text.push_str("\n\n");
                            last.text.push_str(body);
                        }
                        _ => pages.push(PageText {
                            page_number: page,
                            text: body.to_string(),
                        }),
                    }
                    served_by.get_or_insert(reply);
                }
                Err(e) => {
                    tracing::warn!(page, error = %e, "Page recognition failed, skipping");
                    if !pages_failed.contains(&page) {
                        pages_failed.push(page);
                    }
                    last_error = Some(e);
                }
            }
        }
        pages_failed.retain(|page| !pages.iter().any(|p| p.page_number == *page));

        let Some(first) = served_by else {
            return Err(last_error
                .map(ExtractionError::from)
                .unwrap_or_else(|| ExtractionError::ImageProcessing("no page recognized".into())));
        };

        tracing::info!(
            pages_processed = pages.len(),
            pages_failed = pages_failed.len(),
            provider = %first.provider,
            model = %first.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "OCR complete"
        );

        Ok(OcrOutput {
            pages_processed: pages.len(),
            text: label_pages(&pages),
            pages,
            source: first.provider,
            model: first.model,
            pages_failed,
        })
    }
}

fn recognize_page(
    vision: &dyn VisionClient,
    image: &ExtractedImage,
    prompt: &str,
) -> Result<VisionReply, VisionError> {
    let reply = vision.extract_text(&image.data, prompt)?;
    if reply.content.trim().is_empty() {
        return Err(VisionError::EmptyResponse);
    }
    tracing::debug!(page = image.page, len = reply.content.len(), "Page recognized");
    Ok(reply)
}

/// Bounded worker pool: `workers` scoped threads pull page indices from a
/// shared cursor. Results carry their index so the caller can reorder.
fn recognize_pooled(
    vision: &dyn VisionClient,
    page_images: &[ExtractedImage],
    prompt: &str,
    workers: usize,
) -> Vec<(usize, Result<VisionReply, VisionError>)> {
    let next = AtomicUsize::new(0);
    let results = Mutex::new(Vec::with_capacity(page_images.len()));
    let workers = workers.min(page_images.len()).max(1);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(image) = page_images.get(i) else {
                    break;
                };
                let outcome = recognize_page(vision, image, prompt);
                results
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push((i, outcome));
            });
        }
    });

    results.into_inner().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::document::{
        mock_image, MockDocument, MockDocumentLoader, NativeMetadata,
    };
    use crate::pipeline::extraction::types::{ImageKind, TableKind};
    use crate::pipeline::vision::MockVisionClient;
    use std::time::Duration;

    const MARKDOWN: &str = "| A | B |\n|---|---|\n| 1 | 2 |";

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn parser(loader: MockDocumentLoader, vision: MockVisionClient, config: PipelineConfig) -> PdfParser {
        PdfParser::new(Arc::new(loader), Arc::new(vision), config)
    }

    fn pdf_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"%PDF-1.7 test fixture").unwrap();
        file
    }

    fn prose(chars: usize) -> String {
        let sentence = "The committee reviewed the annual figures in detail. ";
        sentence.repeat(chars / sentence.len() + 1)[..chars].to_string()
    }

    // --- classification ---

    #[test]
    fn no_images_never_image_based() {
        for len in [0, 10, 49, 50, 5000] {
            for structure in [None, Some(StructureType::ImageHeavyDocument)] {
                assert!(!is_image_based(0, len, structure, 50));
            }
        }
    }

    #[test]
    fn ample_text_with_images_not_image_based_unless_layout_says_so() {
        assert!(!is_image_based(3, 50, Some(StructureType::MixedDocument), 50));
        assert!(!is_image_based(3, 1200, None, 50));
        assert!(is_image_based(3, 1200, Some(StructureType::ImageHeavyDocument), 50));
        assert!(is_image_based(1, 49, None, 50));
    }

    // --- end-to-end ---

    #[test]
    fn scenario_text_pdf_with_diagram_skips_ocr() {
        let text = prose(400);
        let doc = MockDocument::new(&[text.as_str(), text.as_str(), text.as_str()])
            .with_images(vec![mock_image(2, "diagram", 4000, ImageKind::Embedded)]);
        let loader = MockDocumentLoader::new(doc);
        let destroyed = loader.destroy_counter();
        let vision = MockVisionClient::new("unused");
        let calls = vision.call_counter();

        let result = parser(loader, vision, config()).parse(pdf_file().path()).unwrap();

        assert!(result.success);
        assert_eq!(result.pages, 3);
        assert!(!result.is_image_based);
        assert!(!result.ocr_applied);
        assert!(result.ocr_source.is_none());
        assert_eq!(result.images.len(), 1);
        assert!(result.tables.is_empty());
        assert_eq!(calls.get(), 0);
        assert!(result.text.starts_with("The committee reviewed"));
        let post = result.ocr_post_processing.unwrap();
        assert!(post.processing_steps.contains(&"mechanical-cleanup".to_string()));
        assert_eq!(result.metadata.page_count, 3);
        assert!(result.metadata.word_count > 100);
        // Both the main handle and the layout analyzer's handle were released.
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn scenario_scanned_pdf_ordered_by_page_not_completion() {
        let shot1 = mock_image(1, "render", 2000, ImageKind::PageScreenshot);
        let shot2 = mock_image(2, "render", 2000, ImageKind::PageScreenshot);
        let doc = MockDocument::new(&["", ""])
            .with_images(vec![
                mock_image(1, "scan", 9000, ImageKind::Embedded),
                mock_image(2, "scan", 9000, ImageKind::Embedded),
            ])
            .with_screenshots(vec![shot1.clone(), shot2.clone()]);
        // Page 1 is slow, so page 2 finishes first. Refinement drops any
        // structure it is given and returns bare prose.
        let vision = MockVisionClient::new("unused")
            .named("cloud")
            .with_model("glm-4.5v")
            .with_response_for(&shot1.data, "first page text")
            .with_response_for(&shot2.data, "second page text")
            .with_completion_for("first page text", "First page, refined.")
            .with_completion_for("second page text", "Second page, refined.")
            .with_delay_for(&shot1.data, Duration::from_millis(150));
        let calls = vision.call_counter();
        let log = vision.prompt_log();
        let mut cfg = config();
        cfg.ocr_concurrency = 2;
        cfg.skip_table_extraction = true;

        let result = parser(MockDocumentLoader::new(doc), vision, cfg)
            .parse(pdf_file().path())
            .unwrap();

        assert!(result.is_image_based);
        assert!(result.ocr_applied);
        assert_eq!(result.ocr_source.as_deref(), Some("cloud:glm-4.5v"));
        // Two page calls plus one refinement call per page.
        assert_eq!(calls.get(), 4);
        assert_eq!(
            result.text,
            "--- Page 1 ---\nFirst page, refined.\n\n--- Page 2 ---\nSecond page, refined."
        );
        // Each page body is refined on its own, in page order.
        let prompts = log.lock().unwrap();
        assert!(prompts[2].ends_with("Text:\nfirst page text"));
        assert!(prompts[3].ends_with("Text:\nsecond page text"));
    }

    #[test]
    fn sequential_scanned_pdf_keeps_page_blocks() {
        let shot1 = mock_image(1, "render", 2000, ImageKind::PageScreenshot);
        let shot2 = mock_image(2, "render", 2000, ImageKind::PageScreenshot);
        let doc = MockDocument::new(&["", ""])
            .with_images(vec![mock_image(1, "scan", 9000, ImageKind::Embedded)])
            .with_screenshots(vec![shot1.clone(), shot2.clone()]);
        let vision = MockVisionClient::new("unused")
            .with_response_for(&shot1.data, "first page text")
            .with_response_for(&shot2.data, "second page text")
            .with_completion_for("first page text", "first page text")
            .with_completion_for("second page text", "second page text");
        let log = vision.prompt_log();
        let cfg = config();
        assert_eq!(cfg.ocr_concurrency, 1);

        let result = parser(MockDocumentLoader::new(doc), vision, cfg)
            .parse(pdf_file().path())
            .unwrap();

        assert!(result.ocr_applied);
        assert_eq!(
            result.text,
            "--- Page 1 ---\nfirst page text\n\n--- Page 2 ---\nsecond page text"
        );
        // Pages are recognized strictly one after another.
        let prompts = log.lock().unwrap();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[0].starts_with("Extract all text"));
        assert!(prompts[1].starts_with("Extract all text"));
        assert!(prompts[2].ends_with("first page text"));
        assert!(prompts[3].ends_with("second page text"));
    }

    #[test]
    fn embedded_images_on_one_page_share_a_label() {
        let chart1 = mock_image(1, "chart-a", 4000, ImageKind::Embedded);
        let chart2 = mock_image(1, "chart-b", 4000, ImageKind::Embedded);
        let appendix = mock_image(2, "appendix", 4000, ImageKind::Embedded);
        let vision = MockVisionClient::new("unused")
            .with_response_for(&chart1.data, "chart one")
            .with_response_for(&chart2.data, "chart two")
            .with_response_for(&appendix.data, "appendix");
        let doc = MockDocument::new(&["", ""]);
        let parser = parser(MockDocumentLoader::new(doc), vision, config());

        let output = parser.run_ocr(&[appendix, chart1, chart2], None).unwrap();
        assert_eq!(
            output.text,
            "--- Page 1 ---\nchart one\n\nchart two\n\n--- Page 2 ---\nappendix"
        );
        assert_eq!(output.pages.len(), 2);
        assert_eq!(output.pages_processed, 2);
        assert_eq!(output.text.matches("--- Page 1 ---").count(), 1);
    }

    #[test]
    fn page_with_one_failed_image_is_not_failed() {
        let chart1 = mock_image(1, "chart-a", 4000, ImageKind::Embedded);
        let chart2 = mock_image(1, "chart-b", 4000, ImageKind::Embedded);
        let vision = MockVisionClient::new("unused")
            .with_error_for(&chart1.data, VisionError::EmptyResponse)
            .with_response_for(&chart2.data, "chart two");
        let parser = parser(MockDocumentLoader::new(MockDocument::new(&[""])), vision, config());

        let output = parser.run_ocr(&[chart1, chart2], None).unwrap();
        assert_eq!(output.text, "--- Page 1 ---\nchart two");
        assert!(output.pages_failed.is_empty());
    }

    #[test]
    fn ocr_text_concatenated_in_page_order() {
        let shot1 = mock_image(1, "render", 2000, ImageKind::PageScreenshot);
        let shot2 = mock_image(2, "render", 2000, ImageKind::PageScreenshot);
        let doc = MockDocument::new(&["", ""])
            .with_images(vec![mock_image(1, "scan", 9000, ImageKind::Embedded)])
            .with_screenshots(vec![shot2.clone(), shot1.clone()]);
        let vision = MockVisionClient::new("unused")
            .with_response_for(&shot1.data, "alpha")
            .with_response_for(&shot2.data, "beta")
            .with_delay_for(&shot1.data, Duration::from_millis(100));
        let mut cfg = config();
        cfg.ocr_concurrency = 4;
        let parser = parser(MockDocumentLoader::new(doc), vision, cfg);

        let output = parser
            .run_ocr(&[shot2, shot1], None)
            .unwrap();
        assert_eq!(output.text, "--- Page 1 ---\nalpha\n\n--- Page 2 ---\nbeta");
        assert_eq!(output.pages_processed, 2);
        assert_eq!(output.pages[0].page_number, 1);
        assert_eq!(output.pages[1].text, "beta");
    }

    #[test]
    fn sequential_ocr_uses_screenshots_first() {
        let shot = mock_image(1, "render", 2000, ImageKind::PageScreenshot);
        let embedded = mock_image(1, "scan", 9000, ImageKind::Embedded);
        let doc = MockDocument::new(&[""])
            .with_images(vec![embedded.clone()])
            .with_screenshots(vec![shot.clone()]);
        let vision = MockVisionClient::new("refined")
            .with_response_for(&shot.data, "from screenshot")
            .with_error_for(&embedded.data, VisionError::EmptyResponse);
        let log = vision.prompt_log();

        let result = parser(MockDocumentLoader::new(doc), vision, config())
            .parse(pdf_file().path())
            .unwrap();
        assert!(result.ocr_applied);
        assert_eq!(result.text, "--- Page 1 ---\nrefined");
        let prompts = log.lock().unwrap();
        // OCR prompt, then the refinement prompt carrying the page body.
        assert!(prompts[0].starts_with("Extract all text"));
        assert!(prompts[1].ends_with("Text:\nfrom screenshot"));
    }

    #[test]
    fn falls_back_to_embedded_images_without_screenshots() {
        let embedded = mock_image(1, "scan", 9000, ImageKind::Embedded);
        let doc = MockDocument::new(&[""]).with_images(vec![embedded.clone()]);
        let vision = MockVisionClient::new("refined").with_response_for(&embedded.data, "scanned words");
        let log = vision.prompt_log();

        let result = parser(MockDocumentLoader::new(doc), vision, config())
            .parse(pdf_file().path())
            .unwrap();
        assert!(result.ocr_applied);
        assert!(log.lock().unwrap()[1].contains("scanned words"));
    }

    #[test]
    fn partial_page_failure_is_skipped() {
        let shot1 = mock_image(1, "render", 2000, ImageKind::PageScreenshot);
        let shot2 = mock_image(2, "render", 2000, ImageKind::PageScreenshot);
        let doc = MockDocument::new(&["", ""])
            .with_images(vec![mock_image(1, "scan", 9000, ImageKind::Embedded)])
            .with_screenshots(vec![shot1.clone(), shot2.clone()]);
        let vision = MockVisionClient::new("unused")
            .with_error_for(&shot1.data, VisionError::Timeout(60))
            .with_response_for(&shot2.data, "second page");
        let parser = parser(MockDocumentLoader::new(doc), vision, config());

        let output = parser.run_ocr(&[shot1, shot2], None).unwrap();
        assert_eq!(output.text, "--- Page 2 ---\nsecond page");
        assert_eq!(output.pages_failed, vec![1]);
    }

    #[test]
    fn total_ocr_failure_keeps_native_text() {
        let doc = MockDocument::new(&["tiny"])
            .with_images(vec![mock_image(1, "scan", 9000, ImageKind::Embedded)]);
        let vision = MockVisionClient::failing(VisionError::Timeout(60));

        let result = parser(MockDocumentLoader::new(doc), vision, config())
            .parse(pdf_file().path())
            .unwrap();
        assert!(result.is_image_based);
        assert!(!result.ocr_applied);
        assert_eq!(result.text, "tiny");
    }

    #[test]
    fn vision_initialize_failure_is_not_fatal() {
        let doc = MockDocument::new(&[""])
            .with_images(vec![mock_image(1, "scan", 9000, ImageKind::Embedded)]);
        let vision = MockVisionClient::new("x").failing_initialize(VisionError::NotReachable {
            provider: "local".into(),
            url: "http://localhost:1234/v1".into(),
        });
        let calls = vision.call_counter();

        let result = parser(MockDocumentLoader::new(doc), vision, config())
            .parse(pdf_file().path())
            .unwrap();
        assert!(result.is_image_based);
        assert!(!result.ocr_applied);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn empty_document_is_empty_result() {
        let doc = MockDocument::new(&[""]);
        let vision = MockVisionClient::new("unused");
        let calls = vision.call_counter();

        let result = parser(MockDocumentLoader::new(doc), vision, config())
            .parse(pdf_file().path())
            .unwrap();
        assert!(!result.is_image_based);
        assert!(!result.ocr_applied);
        assert!(result.text.is_empty());
        assert_eq!(result.table_count, 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn tables_extracted_on_text_branch() {
        let text = format!("{}\n\n{MARKDOWN}\n\n{}", prose(200), prose(100));
        let doc = MockDocument::new(&[text.as_str()]);
        let vision = MockVisionClient::new(MARKDOWN);

        let result = parser(MockDocumentLoader::new(doc), vision, config())
            .parse(pdf_file().path())
            .unwrap();
        assert_eq!(result.table_count, 1);
        assert_eq!(result.tables[0].kind, TableKind::Markdown);
        assert_eq!(result.tables[0].rows, 2);
    }

    #[test]
    fn table_extraction_can_be_disabled() {
        let doc = MockDocument::new(&[MARKDOWN]);
        let vision = MockVisionClient::new(MARKDOWN);
        let calls = vision.call_counter();
        let mut cfg = config();
        cfg.skip_table_extraction = true;

        let result = parser(MockDocumentLoader::new(doc), vision, cfg)
            .parse(pdf_file().path())
            .unwrap();
        assert!(result.tables.is_empty());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn unreadable_document_is_fatal_and_released() {
        let doc = MockDocument::new(&["x"]).with_text_error("broken content stream");
        let loader = MockDocumentLoader::new(doc);
        let destroyed = loader.destroy_counter();
        let file = pdf_file();

        let err = parser(loader, MockVisionClient::new("x"), config())
            .parse(file.path())
            .unwrap_err();
        assert_eq!(err.code(), "PDF_PARSE_FAILED");
        assert_eq!(err.path, file.path());
        // Only the main handle was ever opened.
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = parser(
            MockDocumentLoader::new(MockDocument::new(&[])),
            MockVisionClient::new("x"),
            config(),
        )
        .parse(Path::new("/nonexistent/scan.pdf"))
        .unwrap_err();
        assert_eq!(err.code(), "FILE_NOT_FOUND");
    }

    #[test]
    fn corrupt_document_is_fatal() {
        let err = parser(
            MockDocumentLoader::failing("not a PDF"),
            MockVisionClient::new("x"),
            config(),
        )
        .parse(pdf_file().path())
        .unwrap_err();
        assert!(err.to_string().contains("not a PDF"));
    }

    #[test]
    fn metadata_filled_from_file_and_document() {
        let doc = MockDocument::new(&["Short note"]).with_metadata(NativeMetadata {
            title: Some("Annual Report".into()),
            author: Some("Finance".into()),
            ..Default::default()
        });
        let file = pdf_file();
        let result = parser(MockDocumentLoader::new(doc), MockVisionClient::new("x"), config())
            .parse(file.path())
            .unwrap();
        let meta = &result.metadata;
        assert_eq!(meta.title.as_deref(), Some("Annual Report"));
        assert_eq!(meta.author.as_deref(), Some("Finance"));
        assert_eq!(meta.file_type, Some(FileType::Pdf));
        assert_eq!(meta.file_size, 21);
        assert_eq!(meta.word_count, 2);
        assert!(!meta.content_hash.is_empty());
    }

    #[test]
    fn result_serializes_with_camel_case_keys() {
        let doc = MockDocument::new(&["Short note"]);
        let result = parser(MockDocumentLoader::new(doc), MockVisionClient::new("x"), config())
            .parse(pdf_file().path())
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isImageBased"], false);
        assert_eq!(json["ocrApplied"], false);
        assert_eq!(json["tableCount"], 0);
        assert_eq!(json["layoutAnalysis"]["structureType"], "mixed-document");
    }
}
