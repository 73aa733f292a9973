//! Provider selection: builds the configured generative backend.

use std::sync::Arc;

use murmur_config::ProviderConfig;
use murmur_core::error::GenerationError;
use murmur_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

/// Build the backend named by `config.kind`.
///
/// Every supported kind speaks the OpenAI chat-completions dialect; they
/// differ only in base URL and whether a key is required.
pub fn build_from_config(
    config: &ProviderConfig,
) -> std::result::Result<Arc<dyn Provider>, GenerationError> {
    let kind = config.kind.trim().to_lowercase();
    let base_url = match &config.api_url {
        Some(url) => url.clone(),
        None => default_base_url(&kind).ok_or_else(|| {
            GenerationError::NotConfigured(format!(
                "provider kind '{kind}' has no default URL; set provider.api_url"
            ))
        })?,
    };

    let api_key = match (&config.api_key, kind.as_str()) {
        (Some(key), _) => key.clone(),
        // Local servers accept any key
        (None, "ollama") => "ollama".into(),
        (None, _) => {
            return Err(GenerationError::NotConfigured(format!(
                "provider '{kind}' requires an API key (MURMUR_API_KEY or GEMINI_API_KEY)"
            )));
        }
    };

    Ok(Arc::new(OpenAiCompatProvider::new(
        kind,
        base_url,
        api_key,
        config.timeout_secs,
    )))
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(kind: &str) -> Option<String> {
    let url = match kind {
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "groq" => "https://api.groq.com/openai/v1",
        _ => return None,
    };
    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str, key: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            kind: kind.into(),
            api_key: key.map(String::from),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("gemini").unwrap().contains("googleapis.com"));
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("mystery").is_none());
    }

    #[test]
    fn build_gemini_with_key() {
        let provider = build_from_config(&config("gemini", Some("k"))).unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn missing_key_is_not_configured() {
        let err = build_from_config(&config("openai", None)).err().unwrap();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }

    #[test]
    fn ollama_needs_no_key() {
        assert!(build_from_config(&config("ollama", None)).is_ok());
    }

    #[test]
    fn custom_kind_requires_url() {
        assert!(build_from_config(&config("custom", Some("k"))).is_err());
        let mut with_url = config("custom", Some("k"));
        with_url.api_url = Some("http://10.0.0.2:8000/v1".into());
        assert_eq!(build_from_config(&with_url).unwrap().name(), "custom");
    }
}
