//! OCR post-processing: artifact detection, model-assisted refinement and
//! a whitespace-only mechanical fallback.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::sanitize::mechanical_cleanup;
use super::types::{label_pages, LayoutAnalysis, PageText, PostProcessingResult, StructureType};
use crate::pipeline::vision::{VisionClient, VisionError};

const BASE_CONFIDENCE: f32 = 0.85;
const STABLE_LENGTH_BONUS: f32 = 0.05;
const ISSUES_FOUND_BONUS: f32 = 0.10;
const MAX_CONFIDENCE: f32 = 0.95;

/// Reported when refinement fails and mechanical cleanup is used instead.
pub const FALLBACK_CONFIDENCE: f32 = 0.75;

static HYPHENATED_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w-[ \t]*\n[ \t]*\w").unwrap());
static EXCESS_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {3,}").unwrap());
/// Casing artifacts: `tHe`, `reSULTS`.
static MIXED_CASE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-z]+[A-Z]+[a-z]*\b").unwrap());
/// Short all-caps lines, usually headers that lost their formatting.
static CAPS_HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[A-Z][A-Z0-9 &:/-]{3,60}[ \t]*$").unwrap());

/// Heuristic artifact counts. Informational only: they become prompt hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OcrIssues {
    pub hyphenated_breaks: usize,
    pub excess_spaces: usize,
    pub mixed_case_words: usize,
    pub header_lines: usize,
}

impl OcrIssues {
    pub fn detect(text: &str) -> Self {
        Self {
            hyphenated_breaks: HYPHENATED_BREAK.find_iter(text).count(),
            excess_spaces: EXCESS_SPACES.find_iter(text).count(),
            mixed_case_words: MIXED_CASE_WORD.find_iter(text).count(),
            header_lines: CAPS_HEADER_LINE.find_iter(text).count(),
        }
    }

    pub fn total(&self) -> usize {
        self.hyphenated_breaks + self.excess_spaces + self.mixed_case_words + self.header_lines
    }

    /// One human-readable hint per artifact class present.
    pub fn hints(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if self.hyphenated_breaks > 0 {
            hints.push(format!(
                "{} word(s) hyphenated across line breaks",
                self.hyphenated_breaks
            ));
        }
        if self.excess_spaces > 0 {
            hints.push(format!("{} run(s) of excess spaces", self.excess_spaces));
        }
        if self.mixed_case_words > 0 {
            hints.push(format!(
                "{} word(s) with broken letter casing",
                self.mixed_case_words
            ));
        }
        if self.header_lines > 0 {
            hints.push(format!(
                "{} all-caps header line(s) that may need formatting",
                self.header_lines
            ));
        }
        hints
    }
}

/// Heuristic confidence: base, plus a bonus when refinement kept the length
/// within 20% of the input, plus a bonus when there were artifacts to fix.
pub fn score_confidence(input: &str, output: &str, issues: &OcrIssues) -> f32 {
    let in_len = input.chars().count() as f32;
    let out_len = output.chars().count() as f32;
    let mut confidence = BASE_CONFIDENCE;
    if (out_len - in_len).abs() < in_len * 0.2 {
        confidence += STABLE_LENGTH_BONUS;
    }
    if issues.total() > 0 {
        confidence += ISSUES_FOUND_BONUS;
    }
    confidence.min(MAX_CONFIDENCE)
}

fn refinement_prompt(text: &str, layout: Option<&LayoutAnalysis>, issues: &OcrIssues) -> String {
    let mut prompt = String::from(
        "The following text was produced by optical character recognition. Clean it up: \
         rejoin words split by line-break hyphens, fix obvious letter-casing errors, \
         normalize spacing and restore paragraph and heading structure. Do not add, \
         remove, translate or summarize content. Return only the corrected text.",
    );
    if let Some(layout) = layout.filter(|l| l.success) {
        let kind = match layout.structure_type {
            StructureType::StructuredDocument => "structured (tables and forms)",
            StructureType::ImageHeavyDocument => "mostly scanned images",
            StructureType::TextDenseDocument => "dense running text",
            StructureType::MixedDocument => "mixed content",
        };
        prompt.push_str(&format!("\n\nThe document layout is {kind}."));
        if layout.layout_summary.total_tables > 0 {
            prompt.push_str(" Keep tables as markdown tables.");
        }
    }
    let hints = issues.hints();
    if !hints.is_empty() {
        prompt.push_str("\n\nDetected issues:\n");
        for hint in &hints {
            prompt.push_str("- ");
            prompt.push_str(hint);
            prompt.push('\n');
        }
    }
    prompt.push_str("\n\nText:\n");
    prompt.push_str(text);
    prompt
}

/// Refines raw recognition output. Never fails.
pub struct OcrPostProcessor {
    vision: Arc<dyn VisionClient>,
}

impl OcrPostProcessor {
    pub fn new(vision: Arc<dyn VisionClient>) -> Self {
        Self { vision }
    }

    /// Clean `text`. With `use_ai` the model refines it; otherwise, or if
    /// the model call fails, only whitespace is normalized.
    pub fn process_ocr_text(
        &self,
        text: &str,
        layout: Option<&LayoutAnalysis>,
        use_ai: bool,
    ) -> PostProcessingResult {
        if text.trim().is_empty() {
            return PostProcessingResult {
                success: false,
                processed_text: String::new(),
                improvements: Vec::new(),
                confidence: 0.0,
                processing_steps: Vec::new(),
            };
        }

        let issues = OcrIssues::detect(text);
        let mut steps = vec!["error-detection".to_string()];

        if use_ai {
            match self.refine(text, layout, &issues) {
                Ok(refined) => {
                    steps.push("ai-refinement".to_string());
                    let confidence = score_confidence(text, &refined, &issues);
                    tracing::info!(
                        input_len = text.len(),
                        output_len = refined.len(),
                        issues = issues.total(),
                        confidence,
                        "OCR text refined"
                    );
                    return PostProcessingResult {
                        success: true,
                        processed_text: refined,
                        improvements: issues.hints(),
                        confidence,
                        processing_steps: steps,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "OCR refinement failed, using mechanical cleanup");
                    steps.push("ai-refinement-failed".to_string());
                    steps.push("mechanical-cleanup".to_string());
                    let processed = mechanical_cleanup(text);
                    return PostProcessingResult {
                        success: true,
                        improvements: whitespace_improvements(text, &processed),
                        processed_text: processed,
                        confidence: FALLBACK_CONFIDENCE,
                        processing_steps: steps,
                    };
                }
            }
        }

        steps.push("mechanical-cleanup".to_string());
        let processed = mechanical_cleanup(text);
        let confidence = score_confidence(text, &processed, &issues);
        PostProcessingResult {
            success: true,
            improvements: whitespace_improvements(text, &processed),
            processed_text: processed,
            confidence,
            processing_steps: steps,
        }
    }

    /// Refine recognized pages one at a time and re-emit them as labeled
    /// blocks in the given order. Confidence is the weakest page's.
    pub fn process_ocr_pages(
        &self,
        pages: &[PageText],
        layout: Option<&LayoutAnalysis>,
    ) -> PostProcessingResult {
        let mut refined = Vec::with_capacity(pages.len());
        let mut improvements: Vec<String> = Vec::new();
        let mut steps: Vec<String> = Vec::new();
        let mut confidence: Option<f32> = None;

        for page in pages {
            let result = self.process_ocr_text(&page.text, layout, true);
            if !result.success {
                continue;
            }
            for item in result.improvements {
                if !improvements.contains(&item) {
                    improvements.push(item);
                }
            }
            for step in result.processing_steps {
                if !steps.contains(&step) {
                    steps.push(step);
                }
            }
            confidence = Some(confidence.map_or(result.confidence, |c| c.min(result.confidence)));
            refined.push(PageText {
                page_number: page.page_number,
                text: result.processed_text,
            });
        }

        PostProcessingResult {
            success: !refined.is_empty(),
            processed_text: label_pages(&refined),
            improvements,
            confidence: confidence.unwrap_or(0.0),
            processing_steps: steps,
        }
    }

    fn refine(
        &self,
        text: &str,
        layout: Option<&LayoutAnalysis>,
        issues: &OcrIssues,
    ) -> Result<String, VisionError> {
        let reply = self
            .vision
            .complete_text(&refinement_prompt(text, layout, issues))?;
        let refined = reply.content.trim();
        if refined.is_empty() {
            return Err(VisionError::EmptyResponse);
        }
        Ok(refined.to_string())
    }
}

fn whitespace_improvements(before: &str, after: &str) -> Vec<String> {
    if before == after {
        Vec::new()
    } else {
        vec!["Normalized whitespace".to_string()]
    }
}
