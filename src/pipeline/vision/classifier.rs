//! Vision-capability classification for discovered model identifiers.
//!
//! Model servers rarely advertise capabilities, so the default classifier
//! matches identifier patterns. It sits behind a trait so an explicit
//! capability flag can replace it without touching the HTTP client.

use regex::Regex;

/// Decides whether a model identifier accepts image input.
pub trait ModelClassifier: Send + Sync {
    fn is_vision_capable(&self, model_id: &str) -> bool;
}

/// Default identifier patterns for vision-capable families.
const DEFAULT_VISION_PATTERNS: &[&str] = &[
    // "-vl", "_vl", "vl-", "qwen2.5-vl-7b", "internvl2"
    r"(^|[-_./:])vl($|[-_./:\d])",
    r"internvl",
    r"vision",
    r"llava",
    r"bakllava",
    r"moondream",
    r"minicpm-?v",
    r"pixtral",
    r"cogvlm",
    r"glm-?4(\.\d+)?v",
    r"gemma-?3",
    r"medgemma",
    r"smolvlm",
    r"idefics",
    r"deepseek-ocr",
];

/// Regex-over-identifier classifier.
pub struct NamePatternClassifier {
    patterns: Vec<Regex>,
}

impl NamePatternClassifier {
    /// Build from custom patterns. Invalid patterns are skipped with a warning.
    pub fn with_patterns(patterns: &[&str]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "Skipping invalid model pattern");
                    None
                }
            })
            .collect();
        Self { patterns: compiled }
    }
}

impl Default for NamePatternClassifier {
    fn default() -> Self {
        Self::with_patterns(DEFAULT_VISION_PATTERNS)
    }
}

impl ModelClassifier for NamePatternClassifier {
    fn is_vision_capable(&self, model_id: &str) -> bool {
        let component = model_component(model_id);
        self.patterns.iter().any(|re| re.is_match(&component))
    }
}

/// Strip a publisher namespace (before the last `/`) and lowercase.
///
/// - `"lmstudio-community/Qwen2.5-VL-7B-Instruct-GGUF"` → `"qwen2.5-vl-7b-instruct-gguf"`
/// - `"llava:13b"` → `"llava:13b"`
pub fn model_component(full_name: &str) -> String {
    full_name
        .rsplit('/')
        .next()
        .unwrap_or(full_name)
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_namespace_and_lowercases() {
        assert_eq!(
            model_component("lmstudio-community/Qwen2.5-VL-7B-Instruct-GGUF"),
            "qwen2.5-vl-7b-instruct-gguf"
        );
        assert_eq!(model_component("llava:13b"), "llava:13b");
    }

    #[test]
    fn recognizes_common_vision_families() {
        let c = NamePatternClassifier::default();
        assert!(c.is_vision_capable("qwen/qwen2.5-vl-7b"));
        assert!(c.is_vision_capable("Qwen2-VL-2B-Instruct"));
        assert!(c.is_vision_capable("llama-3.2-11b-vision-instruct"));
        assert!(c.is_vision_capable("llava-v1.6-mistral-7b"));
        assert!(c.is_vision_capable("google/gemma-3-12b"));
        assert!(c.is_vision_capable("glm-4.5v"));
        assert!(c.is_vision_capable("OpenGVLab/InternVL2-8B"));
        assert!(c.is_vision_capable("mistralai/pixtral-12b"));
    }

    #[test]
    fn rejects_text_only_models() {
        let c = NamePatternClassifier::default();
        assert!(!c.is_vision_capable("qwen2.5-7b-instruct"));
        assert!(!c.is_vision_capable("meta-llama-3.1-8b-instruct"));
        assert!(!c.is_vision_capable("text-embedding-nomic-embed-text-v1.5"));
        assert!(!c.is_vision_capable("mistral-7b-instruct-v0.3"));
    }

    #[test]
    fn vl_must_be_a_token() {
        let c = NamePatternClassifier::default();
        // "devlin" contains "vl" but not as its own token
        assert!(!c.is_vision_capable("devlin-7b"));
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let c = NamePatternClassifier::with_patterns(&["^my-ocr-"]);
        assert!(c.is_vision_capable("team/my-ocr-small"));
        assert!(!c.is_vision_capable("llava-7b"));
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let c = NamePatternClassifier::with_patterns(&["(unclosed", "vision"]);
        assert!(c.is_vision_capable("some-vision-model"));
    }
}
