//! Layout analysis: per-page text blocks, image regions and table
//! candidates, rolled up into a document structure classification that
//! steers the OCR prompt.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::document::{DocumentLoader, HandleGuard, ImageOptions};
use super::table_detect::detect_page_tables;
use super::types::{
    ExtractedImage, ImageRegion, LayoutAnalysis, LayoutSummary, PageLayout, PageLayoutType,
    PageText, StructureType, TextBlock,
};
use super::ExtractionError;

/// Blocks shorter than this (page numbers, running headers) carry no structure.
pub const MIN_BLOCK_CHARS: usize = 20;

/// Block size buckets for the page histogram.
const LARGE_BLOCK_CHARS: usize = 500;
const SMALL_BLOCK_CHARS: usize = 100;

static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

/// Split page text into blank-line separated blocks of at least `MIN_BLOCK_CHARS`.
pub fn split_blocks(text: &str) -> Vec<TextBlock> {
    BLANK_LINE
        .split(text)
        .filter_map(|raw| {
            let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            let joined = lines.join(" ");
            let length = joined.chars().count();
            (length >= MIN_BLOCK_CHARS).then(|| TextBlock {
                text: joined,
                length,
                line_count: lines.len(),
            })
        })
        .collect()
}

/// Ordered page rules: images, then block count, then block-size histogram.
pub fn classify_page(blocks: &[TextBlock], image_count: usize) -> PageLayoutType {
    if image_count > 2 {
        return PageLayoutType::ImageHeavy;
    }
    if blocks.len() < 3 {
        return PageLayoutType::SparseText;
    }
    let large = blocks.iter().filter(|b| b.length >= LARGE_BLOCK_CHARS).count();
    let small = blocks.iter().filter(|b| b.length < SMALL_BLOCK_CHARS).count();
    if large > 2 {
        PageLayoutType::TextDense
    } else if small > 5 {
        PageLayoutType::Fragmented
    } else {
        PageLayoutType::Balanced
    }
}

/// Ordered document rules: table density, then image density, then text density.
pub fn classify_document(summary: &LayoutSummary) -> StructureType {
    if summary.total_tables > 3 {
        StructureType::StructuredDocument
    } else if summary.total_images > 5 && summary.total_text_blocks < 10 {
        StructureType::ImageHeavyDocument
    } else if summary.total_text_blocks > 20 {
        StructureType::TextDenseDocument
    } else {
        StructureType::MixedDocument
    }
}

/// Analyze already-extracted pages and images.
pub fn analyze_pages(pages: &[PageText], images: &[ExtractedImage]) -> LayoutAnalysis {
    let page_layouts: Vec<PageLayout> = pages
        .iter()
        .map(|page| {
            let text_blocks = split_blocks(&page.text);
            let regions: Vec<ImageRegion> = images
                .iter()
                .filter(|img| img.page == page.page_number)
                .map(|img| ImageRegion {
                    name: img.name.clone(),
                    width: img.width,
                    height: img.height,
                    size: img.size,
                })
                .collect();
            let tables = detect_page_tables(&page.text);
            let estimated_layout_type = classify_page(&text_blocks, regions.len());
            PageLayout {
                page_number: page.page_number,
                total_text_length: page.text.trim().chars().count(),
                text_blocks,
                images: regions,
                tables,
                estimated_layout_type,
            }
        })
        .collect();

    let layout_summary = LayoutSummary {
        total_text_blocks: page_layouts.iter().map(|p| p.text_blocks.len()).sum(),
        total_images: page_layouts.iter().map(|p| p.images.len()).sum(),
        total_tables: page_layouts.iter().map(|p| p.tables.len()).sum(),
    };
    let structure_type = classify_document(&layout_summary);

    LayoutAnalysis {
        success: true,
        total_pages: page_layouts.len(),
        pages: page_layouts,
        layout_summary,
        structure_type,
        error: None,
    }
}

/// Opens documents on its own so the main pipeline never depends on it.
pub struct LayoutAnalyzer {
    loader: Arc<dyn DocumentLoader>,
}

impl LayoutAnalyzer {
    pub fn new(loader: Arc<dyn DocumentLoader>) -> Self {
        Self { loader }
    }

    /// Analyze the document at `path`. Never fails: any internal error is
    /// reported as an unsuccessful analysis with no pages.
    pub fn analyze_document(&self, path: &Path) -> LayoutAnalysis {
        let start = std::time::Instant::now();
        match self.try_analyze(path) {
            Ok(analysis) => {
                tracing::info!(
                    pages = analysis.total_pages,
                    blocks = analysis.layout_summary.total_text_blocks,
                    images = analysis.layout_summary.total_images,
                    tables = analysis.layout_summary.total_tables,
                    structure = ?analysis.structure_type,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Layout analysis complete"
                );
                analysis
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Layout analysis failed");
                LayoutAnalysis::failed(e.to_string())
            }
        }
    }

    fn try_analyze(&self, path: &Path) -> Result<LayoutAnalysis, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let handle = HandleGuard::new(self.loader.open(bytes)?);
        let pages = handle.get_text()?;
        let images = handle.get_images(&ImageOptions::default())?;
        Ok(analyze_pages(&pages, &images))
    }
}
