//! Vision-capable language model clients.
//!
//! Two concrete backends speak the OpenAI-compatible chat-completions dialect:
//! - **Local**: a model server on this machine (LM Studio style), with model
//!   discovery and heuristic vision-capability classification.
//! - **Cloud**: a hosted multimodal API with bearer credentials.
//!
//! `FailoverVisionClient` wraps a primary and a fallback and exposes the same
//! `VisionClient` trait, so the extraction pipeline never knows which backend
//! served a call.

pub mod types;
pub mod classifier;
pub mod openai_types;
pub mod local;
pub mod cloud;
pub mod failover;
pub mod mock;

pub use types::*;
pub use classifier::*;
pub use local::*;
pub use cloud::*;
pub use failover::*;
pub use mock::*;

use std::sync::Arc;

use thiserror::Error;

use crate::config::{ProviderChoice, VisionConfig};

#[derive(Error, Debug, Clone)]
pub enum VisionError {
    #[error("{provider} vision backend is not configured: {reason}")]
    NotConfigured { provider: String, reason: String },

    #[error("{provider} vision backend is not reachable at {url}")]
    NotReachable { provider: String, url: String },

    #[error("Vision API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Vision request timed out after {0} seconds")]
    Timeout(u64),

    #[error("No vision-capable model is available on {0}")]
    NoVisionModel(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed vision response: {0}")]
    ResponseParsing(String),

    #[error("Vision model returned an empty response")]
    EmptyResponse,

    #[error("Image payload is not a data URL")]
    InvalidImage,

    #[error("Primary vision backend failed ({primary}); fallback also failed ({fallback})")]
    FailoverExhausted { primary: String, fallback: String },
}

impl VisionError {
    /// Stable classification code for response envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured { .. } => "VISION_NOT_CONFIGURED",
            Self::NotReachable { .. } => "VISION_UNREACHABLE",
            Self::Api { .. } if self.is_auth_failure() => "VISION_AUTH_FAILED",
            Self::Api { .. } => "VISION_API_ERROR",
            Self::Timeout(_) => "VISION_TIMEOUT",
            Self::NoVisionModel(_) => "VISION_NO_MODEL",
            Self::Network(_) => "VISION_NETWORK",
            Self::ResponseParsing(_) => "VISION_BAD_RESPONSE",
            Self::EmptyResponse => "VISION_EMPTY_RESPONSE",
            Self::InvalidImage => "VISION_INVALID_IMAGE",
            Self::FailoverExhausted { .. } => "VISION_FAILOVER_EXHAUSTED",
        }
    }

    /// Whether this error belongs to the credential class that failover retries.
    pub fn is_auth_failure(&self) -> bool {
        is_auth_failure_message(&self.to_string())
    }
}

/// Build the process-wide vision client from configuration.
///
/// `local` → local backend only. `cloud` → cloud primary with local fallback.
/// `auto` → cloud primary only when a cloud credential is present, else local.
pub fn build_vision_client(config: &VisionConfig) -> Arc<dyn VisionClient> {
    let use_cloud = match config.provider {
        ProviderChoice::Local => false,
        ProviderChoice::Cloud => true,
        ProviderChoice::Auto => config.cloud.api_key.is_some(),
    };

    let local = LocalVisionClient::new(config.local.clone(), Box::new(NamePatternClassifier::default()));

    if use_cloud {
        tracing::info!(
            provider = ?config.provider,
            cloud_url = %config.cloud.base_url,
            local_url = %config.local.base_url,
            "Vision client: cloud primary with local fallback"
        );
        let cloud = CloudVisionClient::new(config.cloud.clone());
        Arc::new(FailoverVisionClient::new(Box::new(cloud), Box::new(local)))
    } else {
        tracing::info!(
            provider = ?config.provider,
            local_url = %config.local.base_url,
            "Vision client: local backend only"
        );
        Arc::new(local)
    }
}
