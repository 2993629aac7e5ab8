//! Hosted multimodal API backend (GLM vision models on Z.AI / BigModel).
//!
//! Base URL precedence: explicit override, then the endpoint implied by the
//! plan mode, then the default. Credentials come from the first non-empty of
//! several environment variables. Every request carries a wall-clock timeout;
//! the in-flight request is dropped when it elapses.

use std::time::{Duration, Instant};

use super::openai_types::{map_transport_error, post_chat_completion, ChatCompletionRequest, SamplingOptions};
use super::types::{validate_data_url, VisionClient, VisionReply};
use super::VisionError;
use crate::config::CloudBackendConfig;

const PROVIDER: &str = "cloud";

pub const CODING_PLAN_BASE_URL: &str = "https://api.z.ai/api/coding/paas/v4";
pub const GENERAL_BASE_URL: &str = "https://api.z.ai/api/paas/v4";
pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Credential variables, in precedence order.
pub const CREDENTIAL_VARS: &[&str] = &["ZAI_API_KEY", "ZHIPUAI_API_KEY", "GLM_API_KEY"];

/// Resolve the cloud base URL from the three precedence tiers.
pub fn resolve_base_url(explicit: Option<&str>, mode: Option<&str>) -> String {
    if let Some(url) = explicit.map(str::trim).filter(|u| !u.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    match mode.map(|m| m.trim().to_lowercase()).as_deref() {
        Some("coding-plan") | Some("coding_plan") | Some("coding") => CODING_PLAN_BASE_URL.to_string(),
        Some("general") | Some("standard") => GENERAL_BASE_URL.to_string(),
        Some(other) if !other.is_empty() => {
            tracing::warn!(mode = %other, "Unknown cloud mode, using default endpoint");
            DEFAULT_BASE_URL.to_string()
        }
        _ => DEFAULT_BASE_URL.to_string(),
    }
}

/// First non-empty credential among `CREDENTIAL_VARS`.
pub fn resolve_api_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    CREDENTIAL_VARS
        .iter()
        .filter_map(|var| lookup(var))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

pub struct CloudVisionClient {
    config: CloudBackendConfig,
    client: reqwest::blocking::Client,
}

impl CloudVisionClient {
    pub fn new(config: CloudBackendConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for cloud backend");
                reqwest::blocking::Client::new()
            });
        Self { config, client }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn api_key(&self) -> Result<&str, VisionError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| VisionError::NotConfigured {
                provider: PROVIDER.to_string(),
                reason: format!("no API key found in {}", CREDENTIAL_VARS.join(", ")),
            })
    }

    fn sampling(&self) -> SamplingOptions {
        SamplingOptions {
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
        }
    }

    fn send(&self, request: &ChatCompletionRequest, operation: &str) -> Result<VisionReply, VisionError> {
        let api_key = self.api_key()?;
        let _span = tracing::info_span!(
            "cloud_vision_call",
            operation,
            model = %request.model,
        )
        .entered();
        let start = Instant::now();

        let (content, served_by) = post_chat_completion(
            &self.client,
            PROVIDER,
            &self.config.base_url,
            Some(api_key),
            self.config.timeout_secs,
            request,
        )?;

        tracing::debug!(
            elapsed_ms = %start.elapsed().as_millis(),
            response_len = content.len(),
            "Cloud vision call complete"
        );

        Ok(VisionReply {
            content,
            model: served_by.unwrap_or_else(|| request.model.clone()),
            provider: PROVIDER.to_string(),
        })
    }
}

impl VisionClient for CloudVisionClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    /// Checks configuration and that the endpoint answers at all.
    ///
    /// Any HTTP status counts as reachable; credential problems surface on
    /// the first real call, where failover can act on them.
    fn initialize(&self) -> Result<(), VisionError> {
        let api_key = self.api_key()?;
        self.client
            .get(&self.config.base_url)
            .bearer_auth(api_key)
            .send()
            .map_err(|e| map_transport_error(e, PROVIDER, &self.config.base_url, self.config.timeout_secs))?;

        tracing::info!(
            base_url = %self.config.base_url,
            model = %self.config.model,
            "Cloud vision backend initialized"
        );
        Ok(())
    }

    fn extract_text(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        validate_data_url(image_data_url)?;
        let request = ChatCompletionRequest::with_image(&self.config.model, prompt, image_data_url, self.sampling());
        self.send(&request, "extract_text")
    }

    fn analyze_image(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        validate_data_url(image_data_url)?;
        let request = ChatCompletionRequest::with_image(&self.config.model, prompt, image_data_url, self.sampling());
        self.send(&request, "analyze_image")
    }

    fn complete_text(&self, prompt: &str) -> Result<VisionReply, VisionError> {
        let request = ChatCompletionRequest::text_only(&self.config.model, prompt, self.sampling());
        self.send(&request, "complete_text")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(api_key: Option<&str>) -> CloudBackendConfig {
        CloudBackendConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.map(String::from),
            model: "glm-4.5v".to_string(),
            timeout_secs: 1,
            max_tokens: 256,
            temperature: 0.1,
            top_p: 0.9,
        }
    }

    #[test]
    fn explicit_override_beats_mode() {
        let url = resolve_base_url(Some("https://proxy.internal/v4/"), Some("coding-plan"));
        assert_eq!(url, "https://proxy.internal/v4");
    }

    #[test]
    fn mode_selects_endpoint() {
        assert_eq!(resolve_base_url(None, Some("coding-plan")), CODING_PLAN_BASE_URL);
        assert_eq!(resolve_base_url(None, Some("CODING")), CODING_PLAN_BASE_URL);
        assert_eq!(resolve_base_url(None, Some("general")), GENERAL_BASE_URL);
    }

    #[test]
    fn default_when_nothing_set() {
        assert_eq!(resolve_base_url(None, None), DEFAULT_BASE_URL);
        assert_eq!(resolve_base_url(Some("  "), Some("")), DEFAULT_BASE_URL);
        assert_eq!(resolve_base_url(None, Some("bogus")), DEFAULT_BASE_URL);
    }

    #[test]
    fn credential_precedence() {
        let env: HashMap<&str, &str> = [("ZHIPUAI_API_KEY", "second"), ("GLM_API_KEY", "third")].into();
        let key = resolve_api_key(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(key.as_deref(), Some("second"));

        let env: HashMap<&str, &str> = [("ZAI_API_KEY", "first"), ("GLM_API_KEY", "third")].into();
        let key = resolve_api_key(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(key.as_deref(), Some("first"));
    }

    #[test]
    fn blank_credentials_are_skipped() {
        let env: HashMap<&str, &str> = [("ZAI_API_KEY", "   "), ("GLM_API_KEY", "third")].into();
        let key = resolve_api_key(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(key.as_deref(), Some("third"));
        assert!(resolve_api_key(|_| None).is_none());
    }

    #[test]
    fn missing_key_fails_initialize_without_network() {
        let client = CloudVisionClient::new(config(None));
        let err = client.initialize().unwrap_err();
        assert!(matches!(err, VisionError::NotConfigured { .. }));
        // Credential-class wording lets failover treat it as recoverable.
        assert!(err.is_auth_failure());
    }

    #[test]
    fn missing_key_fails_calls_without_network() {
        let client = CloudVisionClient::new(config(None));
        let err = client.complete_text("hello").unwrap_err();
        assert!(matches!(err, VisionError::NotConfigured { .. }));
    }

    #[test]
    fn invalid_image_rejected() {
        let client = CloudVisionClient::new(config(Some("sk-test")));
        assert!(matches!(client.analyze_image("nope", "x"), Err(VisionError::InvalidImage)));
    }
}
