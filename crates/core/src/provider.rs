//! Provider trait: the abstraction over generative-AI backends.
//!
//! A Provider sends role-tagged prompt text to a model and returns the
//! completion. Classification and embeddings are built on the same seam so
//! tests can script every backend interaction with one mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::message::PromptMessage;

/// Maximum tokens requested for a classification label.
pub const CLASSIFY_MAX_TOKENS: u32 = 10;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gemini-1.5-flash", "gpt-4o-mini")
    pub model: String,

    /// The prompt, system segments first
    pub messages: Vec<PromptMessage>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<PromptMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            stop: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text
    pub content: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The model to use for embeddings (e.g., "text-embedding-004").
    pub model: String,

    /// The texts to embed.
    pub inputs: Vec<String>,
}

/// An embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The embedding vectors, one per input text.
    pub embeddings: Vec<Vec<f32>>,

    /// Which model was used.
    pub model: String,
}

/// The core Provider trait.
///
/// Every backend (Gemini, OpenAI, OpenRouter, Ollama, custom) implements this
/// trait. The pipeline calls `complete()` and `classify()` without knowing
/// which backend is configured.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, GenerationError>;

    /// Ask for a short label. Deterministic (temperature 0) and tiny.
    ///
    /// Returns the first word of the reply, lowercased and stripped of
    /// punctuation; an empty reply is a malformed response.
    async fn classify(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, GenerationError> {
        let request = ProviderRequest::new(model, vec![PromptMessage::user(prompt)])
            .with_temperature(0.0)
            .with_max_tokens(CLASSIFY_MAX_TOKENS);
        let response = self.complete(request).await?;
        normalize_label(&response.content).ok_or_else(|| {
            GenerationError::MalformedResponse("empty classification label".into())
        })
    }

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, GenerationError> {
        Err(GenerationError::NotConfigured(format!(
            "Provider '{}' does not support embeddings",
            self.name()
        )))
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, GenerationError> {
        Ok(true)
    }
}

fn normalize_label(raw: &str) -> Option<String> {
    let word = raw
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    (!word.is_empty()).then_some(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, GenerationError> {
            assert_eq!(request.temperature, 0.0);
            assert_eq!(request.max_tokens, Some(CLASSIFY_MAX_TOKENS));
            Ok(ProviderResponse {
                content: self.0.into(),
                usage: None,
                model: request.model,
            })
        }
    }

    #[test]
    fn provider_request_defaults() {
        let req = ProviderRequest::new("gemini-1.5-flash", vec![]);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
        assert!(req.stop.is_empty());
    }

    #[tokio::test]
    async fn classify_normalizes_label() {
        let label = Echo("  Respond.\nbecause it asked").classify("m", "?").await.unwrap();
        assert_eq!(label, "respond");
    }

    #[tokio::test]
    async fn classify_rejects_empty_label() {
        let err = Echo("  ...  ").classify("m", "?").await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn embed_is_unsupported_by_default() {
        let err = Echo("x")
            .embed(EmbeddingRequest {
                model: "e".into(),
                inputs: vec!["hi".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }
}
