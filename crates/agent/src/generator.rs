//! Response generation: one bounded backend call per turn.

use std::sync::Arc;
use std::time::Duration;

use murmur_config::ProviderConfig;
use murmur_core::error::GenerationError;
use murmur_core::provider::{Provider, ProviderRequest};
use tracing::{debug, info};

use crate::context::PromptStructure;
use crate::personality::RESPONSE_MARKER;

/// Reply the model uses to decline speaking.
const PASS: &str = "PASS";

/// Calls the generative backend with an assembled prompt.
pub struct ResponseGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &ProviderConfig) -> Self {
        Self::new(provider, config.model.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a reply for the assembled prompt.
    ///
    /// Fails on timeout, backend errors, and empty or `PASS` replies.
    pub async fn generate(&self, prompt: &PromptStructure) -> Result<String, GenerationError> {
        let mut request = ProviderRequest::new(&self.model, prompt.render())
            .with_temperature(self.temperature);
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }

        debug!(
            provider = self.provider.name(),
            model = %self.model,
            prompt_chars = prompt.metadata.total_chars,
            "Generating reply"
        );

        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_secs()))??;

        let reply = extract_reply(&response.content)?;
        info!(model = %response.model, chars = reply.chars().count(), "Reply generated");
        Ok(reply)
    }
}

/// Pull the final reply out of an Analyze/Plan/Response answer.
///
/// Text after the last `Response:` marker wins; without a marker the whole
/// answer is the reply.
pub fn extract_reply(raw: &str) -> Result<String, GenerationError> {
    let body = match raw.rfind(RESPONSE_MARKER) {
        Some(pos) => &raw[pos + RESPONSE_MARKER.len()..],
        None => raw,
    };
    let reply = body.trim().trim_matches('"').trim();

    if reply.is_empty() {
        return Err(GenerationError::MalformedResponse("empty reply".into()));
    }
    if reply.eq_ignore_ascii_case(PASS) {
        return Err(GenerationError::MalformedResponse("model passed".into()));
    }
    Ok(reply.to_string())
}
