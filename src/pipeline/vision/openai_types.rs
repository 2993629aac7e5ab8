//! OpenAI-compatible chat-completions wire types shared by both backends,
//! plus the blocking request helper that maps transport failures onto
//! `VisionError`.

use serde::{Deserialize, Serialize};

use super::VisionError;

// ──────────────────────────────────────────────
// Request types
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Plain string for text-only turns, parts array for multimodal turns.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Sampling parameters carried by every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl ChatCompletionRequest {
    /// Single user turn holding the instruction and one image.
    pub fn with_image(model: &str, prompt: &str, image_data_url: &str, sampling: SamplingOptions) -> Self {
        Self::single_turn(
            model,
            MessageContent::Parts(vec![
                ContentPart::Text { text: prompt.to_string() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: image_data_url.to_string() },
                },
            ]),
            sampling,
        )
    }

    /// Single user turn, text only.
    pub fn text_only(model: &str, prompt: &str, sampling: SamplingOptions) -> Self {
        Self::single_turn(model, MessageContent::Text(prompt.to_string()), sampling)
    }

    fn single_turn(model: &str, content: MessageContent, sampling: SamplingOptions) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content }],
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            stream: false,
        }
    }
}

// ──────────────────────────────────────────────
// Response types
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// First choice's text, trimmed. Empty or missing content is an error.
    pub fn into_text(self) -> Result<String, VisionError> {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            Err(VisionError::EmptyResponse)
        } else {
            Ok(content)
        }
    }
}

/// Model listing (`GET {base}/models`).
///
/// LM Studio's native listing adds `state: "loaded" | "not-loaded"` and
/// `type: "vlm" | "llm" | "embeddings"`; plain OpenAI listings omit both.
#[derive(Debug, Deserialize)]
pub struct ModelListResponse {
    pub data: Vec<ListedModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListedModel {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
}

impl ListedModel {
    pub fn is_loaded(&self) -> bool {
        self.state.as_deref() == Some("loaded")
    }
}

/// Error body shape used by OpenAI-compatible servers.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorDetail {
    Object { message: String },
    Text(String),
}

/// Pull a human-readable message out of an error response body.
pub fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody { error: ApiErrorDetail::Object { message } }) => message,
        Ok(ApiErrorBody { error: ApiErrorDetail::Text(message) }) => message,
        Err(_) => body.trim().chars().take(500).collect(),
    }
}

// ──────────────────────────────────────────────
// Transport
// ──────────────────────────────────────────────

/// POST a chat-completion request and return the reply text and model.
pub fn post_chat_completion(
    client: &reqwest::blocking::Client,
    provider: &str,
    base_url: &str,
    bearer: Option<&str>,
    timeout_secs: u64,
    body: &ChatCompletionRequest,
) -> Result<(String, Option<String>), VisionError> {
    let url = format!("{base_url}/chat/completions");
    let mut request = client.post(&url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .map_err(|e| map_transport_error(e, provider, base_url, timeout_secs))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        let reason = status.canonical_reason().unwrap_or("");
        let detail = api_error_message(&body);
        let message = if detail.is_empty() {
            reason.to_string()
        } else {
            format!("{reason} {detail}").trim().to_string()
        };
        return Err(VisionError::Api { status: status.as_u16(), message });
    }

    let parsed: ChatCompletionResponse = response
        .json()
        .map_err(|e| VisionError::ResponseParsing(e.to_string()))?;
    let model = parsed.model.clone();
    Ok((parsed.into_text()?, model))
}

/// Map a reqwest failure to the vision error taxonomy.
pub fn map_transport_error(
    e: reqwest::Error,
    provider: &str,
    base_url: &str,
    timeout_secs: u64,
) -> VisionError {
    if e.is_timeout() {
        VisionError::Timeout(timeout_secs)
    } else if e.is_connect() {
        VisionError::NotReachable {
            provider: provider.to_string(),
            url: base_url.to_string(),
        }
    } else {
        VisionError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLING: SamplingOptions = SamplingOptions {
        max_tokens: 1024,
        temperature: 0.1,
        top_p: 0.9,
    };

    #[test]
    fn image_request_serializes_as_multimodal_parts() {
        let req = ChatCompletionRequest::with_image("qwen2.5-vl", "Read this", "data:image/png;base64,AAAA", SAMPLING);
        let json = serde_json::to_value(&req).unwrap();
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "Read this");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(json["stream"], false);
        assert_eq!(json["max_tokens"], 1024);
    }

    #[test]
    fn text_request_serializes_as_plain_string() {
        let req = ChatCompletionRequest::text_only("glm-4.5v", "Clean this", SAMPLING);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Clean this");
    }

    #[test]
    fn response_text_is_trimmed() {
        let raw = r#"{"model":"m","choices":[{"message":{"role":"assistant","content":"  Hello  "}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().unwrap(), "Hello");
    }

    #[test]
    fn empty_choices_is_empty_response() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(parsed.into_text(), Err(VisionError::EmptyResponse)));
    }

    #[test]
    fn null_content_is_empty_response() {
        let raw = r#"{"choices":[{"message":{"content":null}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed.into_text(), Err(VisionError::EmptyResponse)));
    }

    #[test]
    fn model_listing_reads_lm_studio_state() {
        let raw = r#"{"data":[
            {"id":"qwen2-vl-7b","type":"vlm","state":"loaded"},
            {"id":"llama-3.1-8b","type":"llm","state":"not-loaded"},
            {"id":"plain-openai-entry"}
        ]}"#;
        let parsed: ModelListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 3);
        assert!(parsed.data[0].is_loaded());
        assert!(!parsed.data[1].is_loaded());
        assert!(!parsed.data[2].is_loaded());
        assert_eq!(parsed.data[0].model_type.as_deref(), Some("vlm"));
    }

    #[test]
    fn api_error_message_variants() {
        assert_eq!(
            api_error_message(r#"{"error":{"message":"Invalid API key","code":"1001"}}"#),
            "Invalid API key"
        );
        assert_eq!(api_error_message(r#"{"error":"Model not loaded"}"#), "Model not loaded");
        assert_eq!(api_error_message("  gateway down \n"), "gateway down");
    }
}
