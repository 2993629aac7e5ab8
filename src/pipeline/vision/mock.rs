//! Scriptable in-process `VisionClient` for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::types::{VisionClient, VisionReply};
use super::VisionError;

/// Shared call counter handed out before the mock is boxed.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock vision client.
///
/// Returns a default response (or error) for every call; per-image responses
/// and artificial latency can be scripted by data URL.
pub struct MockVisionClient {
    name: String,
    model: String,
    default_response: Result<String, VisionError>,
    by_image: HashMap<String, Result<String, VisionError>>,
    /// Text-only replies keyed by a prompt substring, first match wins.
    by_prompt: Vec<(String, String)>,
    delays: HashMap<String, Duration>,
    init_error: Option<VisionError>,
    calls: CallCounter,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            name: "mock".to_string(),
            model: "mock-vision".to_string(),
            default_response: Ok(response.to_string()),
            by_image: HashMap::new(),
            by_prompt: Vec::new(),
            delays: HashMap::new(),
            init_error: None,
            calls: CallCounter::default(),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call fails with `error`.
    pub fn failing(error: VisionError) -> Self {
        let mut mock = Self::new("");
        mock.default_response = Err(error);
        mock
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn failing_initialize(mut self, error: VisionError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn with_response_for(mut self, image_data_url: &str, response: &str) -> Self {
        self.by_image
            .insert(image_data_url.to_string(), Ok(response.to_string()));
        self
    }

    pub fn with_error_for(mut self, image_data_url: &str, error: VisionError) -> Self {
        self.by_image.insert(image_data_url.to_string(), Err(error));
        self
    }

    /// Answer `complete_text` with `response` when the prompt contains `needle`.
    pub fn with_completion_for(mut self, needle: &str, response: &str) -> Self {
        self.by_prompt.push((needle.to_string(), response.to_string()));
        self
    }

    pub fn with_delay_for(mut self, image_data_url: &str, delay: Duration) -> Self {
        self.delays.insert(image_data_url.to_string(), delay);
        self
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Shared view of every prompt received, in call order.
    pub fn prompt_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }

    fn respond(&self, image_data_url: Option<&str>, prompt: &str) -> Result<VisionReply, VisionError> {
        self.calls.bump();
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(prompt.to_string());

        if let Some(delay) = image_data_url.and_then(|url| self.delays.get(url)) {
            std::thread::sleep(*delay);
        }

        if image_data_url.is_none() {
            if let Some((_, response)) = self.by_prompt.iter().find(|(n, _)| prompt.contains(n.as_str())) {
                return Ok(VisionReply {
                    content: response.clone(),
                    model: self.model.clone(),
                    provider: self.name.clone(),
                });
            }
        }

        let scripted = image_data_url.and_then(|url| self.by_image.get(url));
        let outcome = scripted.unwrap_or(&self.default_response).clone();
        outcome.map(|content| VisionReply {
            content,
            model: self.model.clone(),
            provider: self.name.clone(),
        })
    }
}

impl VisionClient for MockVisionClient {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> Result<(), VisionError> {
        match &self.init_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn extract_text(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        self.respond(Some(image_data_url), prompt)
    }

    fn analyze_image(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        self.respond(Some(image_data_url), prompt)
    }

    fn complete_text(&self, prompt: &str) -> Result<VisionReply, VisionError> {
        self.respond(None, prompt)
    }
}
