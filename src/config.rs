//! Environment-sourced configuration, read once at startup.
//!
//! `AppConfig::from_lookup` is the pure core: it takes any key → value
//! function, so tests never mutate the process environment.

use serde::Serialize;

use crate::pipeline::vision::cloud::{resolve_api_key, resolve_base_url};

/// Application-level constants
pub const APP_NAME: &str = "docsift";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default `RUST_LOG` filter when none is set.
pub fn default_log_filter() -> &'static str {
    "docsift=info,warn"
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Explicit provider switch (`DOCSIFT_VISION_PROVIDER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderChoice {
    /// Cloud if a cloud credential is present, otherwise local.
    Auto,
    Local,
    Cloud,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalBackendConfig {
    pub base_url: String,
    /// Placeholder credential; local servers usually ignore it.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Pin a model id instead of discovering one.
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudBackendConfig {
    /// Already resolved through override → mode → default.
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisionConfig {
    pub provider: ProviderChoice,
    pub local: LocalBackendConfig,
    pub cloud: CloudBackendConfig,
}

/// Pipeline toggles.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Skip table extraction entirely.
    pub skip_table_extraction: bool,
    /// Cleaned-text length below which an image-bearing PDF is image-based.
    pub min_text_length: usize,
    /// Page-recognition workers; 1 keeps calls strictly sequential.
    pub ocr_concurrency: usize,
    /// DPI for full-page screenshots sent to the vision model.
    pub render_dpi: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_table_extraction: false,
            min_text_length: 50,
            ocr_concurrency: 1,
            render_dpi: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub vision: VisionConfig,
    pub pipeline: PipelineConfig,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match get("DOCSIFT_VISION_PROVIDER").map(|v| v.to_lowercase()).as_deref() {
            Some("local") | Some("lmstudio") | Some("lm-studio") => ProviderChoice::Local,
            Some("cloud") | Some("glm") | Some("zai") => ProviderChoice::Cloud,
            Some("auto") | None => ProviderChoice::Auto,
            Some(other) => {
                tracing::warn!(value = %other, "Unknown DOCSIFT_VISION_PROVIDER, using auto");
                ProviderChoice::Auto
            }
        };

        let local = LocalBackendConfig {
            base_url: get("DOCSIFT_LOCAL_BASE_URL")
                .unwrap_or_else(|| "http://localhost:1234/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: get("DOCSIFT_LOCAL_API_KEY").unwrap_or_else(|| "lm-studio".to_string()),
            model: get("DOCSIFT_LOCAL_MODEL"),
            timeout_secs: parse_or(&get, "DOCSIFT_LOCAL_TIMEOUT_SECS", 120),
            max_tokens: parse_or(&get, "DOCSIFT_LOCAL_MAX_TOKENS", 4096),
            temperature: parse_or(&get, "DOCSIFT_LOCAL_TEMPERATURE", 0.1),
            top_p: parse_or(&get, "DOCSIFT_LOCAL_TOP_P", 0.9),
        };

        let cloud = CloudBackendConfig {
            base_url: resolve_base_url(
                get("DOCSIFT_CLOUD_BASE_URL").as_deref(),
                get("DOCSIFT_CLOUD_MODE").as_deref(),
            ),
            api_key: resolve_api_key(&get),
            model: get("DOCSIFT_CLOUD_MODEL").unwrap_or_else(|| "glm-4.5v".to_string()),
            timeout_secs: parse_or(&get, "DOCSIFT_CLOUD_TIMEOUT_SECS", 60),
            max_tokens: parse_or(&get, "DOCSIFT_CLOUD_MAX_TOKENS", 4096),
            temperature: parse_or(&get, "DOCSIFT_CLOUD_TEMPERATURE", 0.1),
            top_p: parse_or(&get, "DOCSIFT_CLOUD_TOP_P", 0.9),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            skip_table_extraction: get("DOCSIFT_SKIP_TABLES")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.skip_table_extraction),
            min_text_length: parse_or(&get, "DOCSIFT_MIN_TEXT_LENGTH", defaults.min_text_length),
            ocr_concurrency: parse_or(&get, "DOCSIFT_OCR_CONCURRENCY", defaults.ocr_concurrency).max(1),
            render_dpi: parse_or(&get, "DOCSIFT_RENDER_DPI", defaults.render_dpi),
        };

        Self {
            vision: VisionConfig { provider, local, cloud },
            pipeline,
        }
    }
}

/// Parse a value, warning and using `default` when it does not parse.
fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Unparseable config value, using default");
            default
        }),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
