//! OCR prompt construction, steered by the layout classification.

use super::types::{LayoutAnalysis, StructureType};

const BASE_PROMPT: &str = "Extract all text from this document page image. \
Preserve the reading order, paragraphs, headings and list numbering. \
Output only the extracted text with no commentary.";

const STRUCTURED_ADDENDUM: &str = "This document is structured: it contains tables and \
form-like regions. Reproduce every table as a markdown table with a header row and a \
separator row, and keep each form label on the same line as its value.";

const IMAGE_HEAVY_ADDENDUM: &str = "This document is mostly scanned or graphical content. \
Read every visible piece of text, including captions, labels, stamps and text inside \
figures. Do not describe images; transcribe text only.";

const TEXT_DENSE_ADDENDUM: &str = "This document is dense running text. Keep paragraph \
breaks exactly where they appear, keep hyphenated words whole, and never summarize or \
skip lines.";

/// Build the per-page OCR prompt. Without layout context the base prompt is used.
pub fn build_ocr_prompt(layout: Option<&LayoutAnalysis>) -> String {
    let Some(layout) = layout.filter(|l| l.success) else {
        return BASE_PROMPT.to_string();
    };

    let mut prompt = BASE_PROMPT.to_string();
    let addendum = match layout.structure_type {
        StructureType::StructuredDocument => Some(STRUCTURED_ADDENDUM),
        StructureType::ImageHeavyDocument => Some(IMAGE_HEAVY_ADDENDUM),
        StructureType::TextDenseDocument => Some(TEXT_DENSE_ADDENDUM),
        StructureType::MixedDocument => None,
    };
    if let Some(addendum) = addendum {
        prompt.push_str("\n\n");
        prompt.push_str(addendum);
    }

    let tables = layout.layout_summary.total_tables;
    if tables > 0 {
        prompt.push_str(&format!(
            "\n\nLayout analysis found {tables} probable table{} in this document. \
             Render each one as a markdown table.",
            if tables == 1 { "" } else { "s" }
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::types::LayoutSummary;

    fn layout(structure_type: StructureType, tables: usize) -> LayoutAnalysis {
        LayoutAnalysis {
            success: true,
            pages: vec![],
            total_pages: 1,
            layout_summary: LayoutSummary {
                total_text_blocks: 0,
                total_images: 0,
                total_tables: tables,
            },
            structure_type,
            error: None,
        }
    }

    #[test]
    fn no_layout_uses_base_prompt() {
        assert_eq!(build_ocr_prompt(None), BASE_PROMPT);
        let failed = LayoutAnalysis::failed("boom");
        assert_eq!(build_ocr_prompt(Some(&failed)), BASE_PROMPT);
    }

    #[test]
    fn each_variant_adds_its_instructions() {
        let structured = build_ocr_prompt(Some(&layout(StructureType::StructuredDocument, 0)));
        assert!(structured.contains("markdown table"));
        let image = build_ocr_prompt(Some(&layout(StructureType::ImageHeavyDocument, 0)));
        assert!(image.contains("captions"));
        let dense = build_ocr_prompt(Some(&layout(StructureType::TextDenseDocument, 0)));
        assert!(dense.contains("never summarize"));
        let mixed = build_ocr_prompt(Some(&layout(StructureType::MixedDocument, 0)));
        assert_eq!(mixed, BASE_PROMPT);
    }

    #[test]
    fn table_addendum_counts_tables() {
        let one = build_ocr_prompt(Some(&layout(StructureType::MixedDocument, 1)));
        assert!(one.contains("found 1 probable table in"));
        let many = build_ocr_prompt(Some(&layout(StructureType::StructuredDocument, 5)));
        assert!(many.contains("found 5 probable tables"));
        assert!(many.starts_with(BASE_PROMPT));
    }
}
