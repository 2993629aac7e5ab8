use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::VisionError;

/// Successful reply from a vision backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionReply {
    pub content: String,
    /// Model identifier that produced the reply.
    pub model: String,
    /// Backend that served the call ("local" or "cloud").
    pub provider: String,
}

/// Uniform contract for vision-capable model backends.
///
/// Implementations take `&self` and keep any discovered state (selected
/// model, active backend) behind interior mutability, so one instance can be
/// shared across the pipeline as `Arc<dyn VisionClient>`.
pub trait VisionClient: Send + Sync {
    /// Short backend label used in logs and `ocrSource`.
    fn provider_name(&self) -> &str;

    /// Verify the backend is configured and reachable, selecting a model.
    fn initialize(&self) -> Result<(), VisionError>;

    /// Recover the text visible in an image.
    fn extract_text(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError>;

    /// Free-form interpretation of an image (tables, diagrams, captions).
    fn analyze_image(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError>;

    /// Text-only completion, used for OCR refinement and table normalization.
    fn complete_text(&self, prompt: &str) -> Result<VisionReply, VisionError>;
}

/// Substrings that mark a credential-class failure (case-insensitive).
///
/// Failover retries only these: a bad or expired key on the primary is
/// recoverable by switching providers, anything else is surfaced as-is.
pub const AUTH_FAILURE_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "authentication",
    "forbidden",
    "api key",
    "api_key",
    "apikey",
    "expired",
    "invalid token",
    "invalid_token",
];

/// Classify an error message as an authentication failure.
pub fn is_auth_failure_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_FAILURE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Encode raw image bytes as a `data:` URL.
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime_type};base64,{encoded}")
}

/// Decode the payload of a base64 `data:` URL.
///
/// Returns `(mime_type, bytes)`.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), VisionError> {
    let rest = data_url.strip_prefix("data:").ok_or(VisionError::InvalidImage)?;
    let (header, payload) = rest.split_once(',').ok_or(VisionError::InvalidImage)?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or(VisionError::InvalidImage)?
        .to_string();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| VisionError::InvalidImage)?;
    Ok((mime_type, bytes))
}

/// Cheap structural check before an image goes over the wire.
pub fn validate_data_url(data_url: &str) -> Result<(), VisionError> {
    if data_url.starts_with("data:image/") && data_url.contains(";base64,") {
        Ok(())
    } else {
        Err(VisionError::InvalidImage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_markers_are_case_insensitive() {
        assert!(is_auth_failure_message("401 Unauthorized"));
        assert!(is_auth_failure_message("HTTP 403 FORBIDDEN"));
        assert!(is_auth_failure_message("Invalid API Key provided"));
        assert!(is_auth_failure_message("token has EXPIRED"));
        assert!(is_auth_failure_message("invalid token"));
    }

    #[test]
    fn non_auth_messages_do_not_match() {
        assert!(!is_auth_failure_message("500 Internal Server Error"));
        assert!(!is_auth_failure_message("connection refused"));
        assert!(!is_auth_failure_message("Vision request timed out after 60 seconds"));
        assert!(!is_auth_failure_message(""));
    }

    #[test]
    fn data_url_encode_decode() {
        let url = to_data_url("image/png", &[0x89, 0x50, 0x4E, 0x47]);
        assert!(url.starts_with("data:image/png;base64,"));
        let (mime, bytes) = decode_data_url(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, vec![0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn decode_rejects_plain_strings() {
        assert!(decode_data_url("not a url").is_err());
        assert!(decode_data_url("data:image/png,rawdata").is_err());
    }

    #[test]
    fn validate_requires_image_mime() {
        assert!(validate_data_url("data:image/jpeg;base64,AAAA").is_ok());
        assert!(validate_data_url("data:text/plain;base64,AAAA").is_err());
        assert!(validate_data_url("https://example.com/a.png").is_err());
    }
}
