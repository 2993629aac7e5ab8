//! Two-backend failover coordinator.
//!
//! Calls go to the primary first. Only credential-class failures (see
//! `AUTH_FAILURE_MARKERS`) are retried once on the fallback; every other
//! error is returned unchanged so outages stay visible instead of turning
//! into silent, doubled-latency degraded service.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use super::types::{VisionClient, VisionReply};
use super::VisionError;

/// Which slot of the coordinator is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveBackend {
    Primary,
    Fallback,
}

pub struct FailoverVisionClient {
    primary: Box<dyn VisionClient>,
    fallback: Box<dyn VisionClient>,
    /// True when the fallback served the last successful call.
    use_fallback: AtomicBool,
    /// False once the primary has failed to initialize; calls then skip it.
    primary_available: AtomicBool,
}

impl FailoverVisionClient {
    pub fn new(primary: Box<dyn VisionClient>, fallback: Box<dyn VisionClient>) -> Self {
        Self {
            primary,
            fallback,
            use_fallback: AtomicBool::new(false),
            primary_available: AtomicBool::new(true),
        }
    }

    /// Whether the fallback served the last successful call.
    pub fn use_fallback(&self) -> bool {
        self.use_fallback.load(Ordering::SeqCst)
    }

    /// Initialize the primary, falling back to the secondary on any failure.
    pub fn initialize_backends(&self) -> Result<ActiveBackend, VisionError> {
        match self.primary.initialize() {
            Ok(()) => {
                self.primary_available.store(true, Ordering::SeqCst);
                self.use_fallback.store(false, Ordering::SeqCst);
                tracing::info!(backend = self.primary.provider_name(), "Primary vision backend active");
                Ok(ActiveBackend::Primary)
            }
            Err(primary_err) => {
                tracing::warn!(
                    backend = self.primary.provider_name(),
                    error = %primary_err,
                    "Primary vision backend failed to initialize, trying fallback"
                );
                match self.fallback.initialize() {
                    Ok(()) => {
                        self.primary_available.store(false, Ordering::SeqCst);
                        self.use_fallback.store(true, Ordering::SeqCst);
                        tracing::info!(backend = self.fallback.provider_name(), "Fallback vision backend active");
                        Ok(ActiveBackend::Fallback)
                    }
                    Err(fallback_err) => Err(VisionError::FailoverExhausted {
                        primary: primary_err.to_string(),
                        fallback: fallback_err.to_string(),
                    }),
                }
            }
        }
    }

    /// Run `call` on the primary, retrying on the fallback only for
    /// authentication failures.
    fn with_failover<F>(&self, operation: &str, call: F) -> Result<VisionReply, VisionError>
    where
        F: Fn(&dyn VisionClient) -> Result<VisionReply, VisionError>,
    {
        if !self.primary_available.load(Ordering::SeqCst) {
            let reply = call(self.fallback.as_ref())?;
            self.use_fallback.store(true, Ordering::SeqCst);
            return Ok(reply);
        }

        match call(self.primary.as_ref()) {
            Ok(reply) => {
                self.use_fallback.store(false, Ordering::SeqCst);
                Ok(reply)
            }
            Err(err) if err.is_auth_failure() => {
                tracing::warn!(
                    operation,
                    primary = self.primary.provider_name(),
                    fallback = self.fallback.provider_name(),
                    error = %err,
                    "Authentication failure on primary vision backend, retrying on fallback"
                );
                let reply = call(self.fallback.as_ref())?;
                self.use_fallback.store(true, Ordering::SeqCst);
                Ok(reply)
            }
            Err(err) => Err(err),
        }
    }
}

impl VisionClient for FailoverVisionClient {
    fn provider_name(&self) -> &str {
        "failover"
    }

    fn initialize(&self) -> Result<(), VisionError> {
        self.initialize_backends().map(|_| ())
    }

    fn extract_text(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        self.with_failover("extract_text", |c| c.extract_text(image_data_url, prompt))
    }

    fn analyze_image(&self, image_data_url: &str, prompt: &str) -> Result<VisionReply, VisionError> {
        self.with_failover("analyze_image", |c| c.analyze_image(image_data_url, prompt))
    }

    fn complete_text(&self, prompt: &str) -> Result<VisionReply, VisionError> {
        self.with_failover("complete_text", |c| c.complete_text(prompt))
    }
}
