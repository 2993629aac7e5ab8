//! Local model-server backend (LM Studio or any OpenAI-compatible server).
//!
//! Discovers models through the listing endpoint, keeps only the ones the
//! classifier considers vision-capable, and prefers a model that is already
//! loaded into memory over one that would need a cold load.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::classifier::ModelClassifier;
use super::openai_types::{
    map_transport_error, post_chat_completion, ChatCompletionRequest, ListedModel,
    ModelListResponse, SamplingOptions,
};
use super::types::{validate_data_url, VisionClient, VisionReply};
use super::VisionError;
use crate::config::LocalBackendConfig;

const PROVIDER: &str = "local";

/// Connection establishment is bounded separately from generation time.
const CONNECT_TIMEOUT_SECS: u64 = 5;

pub struct LocalVisionClient {
    config: LocalBackendConfig,
    classifier: Box<dyn ModelClassifier>,
    client: reqwest::blocking::Client,
    selected_model: Mutex<Option<String>>,
}

impl LocalVisionClient {
    pub fn new(config: LocalBackendConfig, classifier: Box<dyn ModelClassifier>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for local backend");
                reqwest::blocking::Client::new()
            });

        Self {
            config,
            classifier,
            client,
            selected_model: Mutex::new(None),
        }
    }

    /// Model chosen by the last successful `initialize()`.
    pub fn selected_model(&self) -> Option<String> {
        self.selected_model
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn list_models(&self) -> Result<Vec<ListedModel>, VisionError> {
        let url = format!("{}/models", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .map_err(|e| map_transport_error(e, PROVIDER, &self.config.base_url, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                message: super::openai_types::api_error_message(&body),
            });
        }

        let parsed: ModelListResponse = response
            .json()
            .map_err(|e| VisionError::ResponseParsing(e.to_string()))?;
        Ok(parsed.data)
    }

    /// Selected model, running discovery first if nothing is selected yet.
    fn ensure_model(&self) -> Result<String, VisionError> {
        if let Some(model) = self.selected_model() {
            return Ok(model);
        }
        self.initialize()?;
        self.selected_model()
            .ok_or_else(|| VisionError::NoVisionModel(self.config.base_url.clone()))
    }

    fn sampling(&self) -> SamplingOptions {
        SamplingOptions {
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
        }
    }

    fn send(&self, request: &ChatCompletionRequest, operation: &str) -> Result<VisionReply, VisionError> {
        let _span = tracing::info_span!(
            "local_vision_call",
            operation,
            model = %request.model,
        )
        .entered();
        let start = Instant::now();

        let (content, served_by) = post_chat_completion(
            &self.client,
            PROVIDER,
            &self.config.base_url,
            Some(&self.config.api_key),
            self.config.timeout_secs,
            request,
        )?;

        tracing::debug!(
            elapsed_ms = %start.elapsed().as_millis(),
            response_len = content.len(),
            "Local vision call complete"
        );

        Ok(VisionReply {
            content,
            model: served_by.unwrap_or_else(|| request.model.clone()),
            provider: PROVIDER.to_string(),
        })
    }
}

impl VisionClient for LocalVisionClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn initialize(&self) -> Result<(), VisionError> {
        let models = self.list_models()?;
        let chosen = select_vision_model(&models, self.classifier.as_ref(), self.config.model.as_deref())
            .ok_or_else(|| VisionError::NoVisionModel(self.config.base_url.clone()))?;

        tracing::info!(
            model = %chosen,
            listed = models.len(),
            base_url = %self.config.base_url,
            "Local vision backend initialized"
        );

        *self.selected_model.lock().unwrap_or_else(|p| p.into_inner()) = Some(chosen);
        Ok(())
    }

    fn extract_text(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        validate_data_url(image_data_url)?;
        let model = self.ensure_model()?;
        let request = ChatCompletionRequest::with_image(&model, prompt, image_data_url, self.sampling());
        self.send(&request, "extract_text")
    }

    fn analyze_image(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        validate_data_url(image_data_url)?;
        let model = self.ensure_model()?;
        let request = ChatCompletionRequest::with_image(&model, prompt, image_data_url, self.sampling());
        self.send(&request, "analyze_image")
    }

    fn complete_text(&self, prompt: &str) -> Result<VisionReply, VisionError> {
        let model = self.ensure_model()?;
        let request = ChatCompletionRequest::text_only(&model, prompt, self.sampling());
        self.send(&request, "complete_text")
    }
}

/// Pick the model to use from a listing.
///
/// Order: a pinned model if the server lists it; otherwise the first loaded
/// vision-capable model; otherwise the first vision-capable model. An
/// explicit `type` from the server overrides the name heuristic.
pub fn select_vision_model(
    models: &[ListedModel],
    classifier: &dyn ModelClassifier,
    pinned: Option<&str>,
) -> Option<String> {
    if let Some(pinned) = pinned {
        if models.iter().any(|m| m.id == pinned) {
            return Some(pinned.to_string());
        }
        tracing::warn!(model = %pinned, "Pinned local model not listed by server, discovering instead");
    }

    let capable: Vec<&ListedModel> = models
        .iter()
        .filter(|m| match m.model_type.as_deref() {
            Some(kind) => kind == "vlm",
            None => classifier.is_vision_capable(&m.id),
        })
        .collect();

    capable
        .iter()
        .find(|m| m.is_loaded())
        .or_else(|| capable.first())
        .map(|m| m.id.clone())
}
