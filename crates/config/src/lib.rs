//! Configuration loading, validation, and management for Murmur.
//!
//! Loads configuration from `~/.murmur/config.toml` (or an explicit path),
//! applies environment variable overrides, then validates everything once
//! at startup. An invalid configuration is the only fatal error class.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.murmur/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat platform connection
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Agent identity and triggering
    #[serde(default)]
    pub agent: AgentConfig,

    /// Per-channel pacing
    #[serde(default)]
    pub cooldown: CooldownConfig,

    /// Prompt context sizing
    #[serde(default)]
    pub context: ContextConfig,

    /// Knowledge retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Generative backend
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Context store
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── Discord ──────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Authorization header value, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Channels to monitor
    #[serde(default)]
    pub channel_ids: Vec<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Seconds between polls of each channel
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Messages per fetch (the platform caps this at 100)
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".into()
}
fn default_poll_interval() -> u64 {
    30
}
fn default_fetch_limit() -> u32 {
    100
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            channel_ids: Vec::new(),
            api_base: default_api_base(),
            poll_interval_secs: default_poll_interval(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &redact(&self.token))
            .field("channel_ids", &self.channel_ids)
            .field("api_base", &self.api_base)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("fetch_limit", &self.fetch_limit)
            .finish()
    }
}

// ── Agent ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The agent's own platform user ID
    #[serde(default)]
    pub my_user_id: String,

    /// Name the agent answers to
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Free-text persona description placed in the preamble
    #[serde(default = "default_personality")]
    pub personality: String,

    /// Extra regular expressions that count as addressing the agent
    #[serde(default)]
    pub trigger_patterns: Vec<String>,

    /// Words the agent must never use
    #[serde(default = "default_avoid_words")]
    pub avoid_words: Vec<String>,

    /// Answer messages found on the first poll of a channel
    #[serde(default)]
    pub respond_to_backlog: bool,

    /// Ask the backend when no rule matches
    #[serde(default)]
    pub llm_intent: bool,
}

fn default_agent_name() -> String {
    "murmur".into()
}
fn default_personality() -> String {
    "a regular member of the community: casual, friendly, brief, and lowercase".into()
}
fn default_avoid_words() -> Vec<String> {
    ["gm", "gn", "hello", "hi", "role", "good", "jack of", "shitty"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            my_user_id: String::new(),
            name: default_agent_name(),
            personality: default_personality(),
            trigger_patterns: Vec::new(),
            avoid_words: default_avoid_words(),
            respond_to_backlog: false,
            llm_intent: false,
        }
    }
}

// ── Cooldown ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Delay armed after a failed generation or send
    #[serde(default = "default_fallback_delay")]
    pub fallback_delay_secs: u64,

    /// Cap on successful actions per rolling window
    #[serde(default = "default_max_actions")]
    pub max_actions_per_window: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_min_delay() -> u64 {
    120
}
fn default_max_delay() -> u64 {
    420
}
fn default_fallback_delay() -> u64 {
    30
}
fn default_max_actions() -> u32 {
    10
}
fn default_window_secs() -> u64 {
    3600
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
            fallback_delay_secs: default_fallback_delay(),
            max_actions_per_window: default_max_actions(),
            window_secs: default_window_secs(),
        }
    }
}

// ── Context ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Messages per conversation window
    #[serde(default = "default_context_limit")]
    pub limit: usize,

    /// Total prompt budget in characters
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    /// Optional cap on the knowledge layer
    #[serde(default = "default_knowledge_chars")]
    pub knowledge_chars: Option<usize>,
}

fn default_context_limit() -> usize {
    20
}
fn default_budget_chars() -> usize {
    8000
}
fn default_knowledge_chars() -> Option<usize> {
    Some(3000)
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            limit: default_context_limit(),
            budget_chars: default_budget_chars(),
            knowledge_chars: default_knowledge_chars(),
        }
    }
}

// ── Retrieval ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// Keyword and tag overlap
    #[default]
    Keyword,
    /// Cosine similarity over embeddings, keyword overlap as fallback
    Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Fragments must score strictly above this
    #[serde(default)]
    pub min_relevance: f32,

    #[serde(default)]
    pub strategy: ScoringStrategy,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Target fragment size at ingestion
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Let the backend rewrite the trigger into a keyword query
    #[serde(default)]
    pub refine_query: bool,

    /// Pages fetched by `murmur ingest` alongside its explicit sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_urls: Vec<String>,
}

fn default_max_results() -> usize {
    8
}
fn default_embedding_model() -> String {
    "text-embedding-004".into()
}
fn default_chunk_chars() -> usize {
    1000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_relevance: 0.0,
            strategy: ScoringStrategy::default(),
            embedding_model: default_embedding_model(),
            chunk_chars: default_chunk_chars(),
            refine_query: false,
            base_urls: Vec::new(),
        }
    }
}

// ── Provider ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Backend kind: gemini, openai, openrouter, ollama, or custom
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the backend's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_kind() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_timeout() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            api_key: None,
            api_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Memory ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Database file; defaults to `~/.murmur/murmur.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Attempts per message commit
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_commit_retries() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    250
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            commit_retries: default_commit_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl MemoryConfig {
    /// The database path, falling back to the config directory.
    pub fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("murmur.db"))
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from `path` (or the default location), apply the
    /// process environment, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::config_dir().join("config.toml"));
        Self::load_with(&path, |key| std::env::var(key).ok())
    }

    /// Like [`AppConfig::load`] with an injectable environment lookup.
    pub fn load_with(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file without overrides or validation.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment variable overrides (highest priority).
    pub fn apply_env_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = env("DISCORD_USER_TOKEN").or_else(|| env("DISCORD_TOKEN")) {
            self.discord.token = Some(token);
        }
        if let Some(ids) = env("DISCORD_CHANNEL_ID") {
            self.discord.channel_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(id) = env("MY_USER_ID") {
            self.agent.my_user_id = id;
        }
        if let Some(name) = env("AGENT_NAME") {
            self.agent.name = name;
        }
        if let Some(personality) = env("AGENT_PERSONALITY") {
            self.agent.personality = personality;
        }
        if let Some(v) = env("MIN_DELAY_SECONDS") {
            self.cooldown.min_delay_secs = parse_env("MIN_DELAY_SECONDS", &v)?;
        }
        if let Some(v) = env("MAX_DELAY_SECONDS") {
            self.cooldown.max_delay_secs = parse_env("MAX_DELAY_SECONDS", &v)?;
        }
        if let Some(v) = env("CONTEXT_LIMIT") {
            self.context.limit = parse_env("CONTEXT_LIMIT", &v)?;
        }
        if let Some(v) = env("RAG_MAX_RESULTS") {
            self.retrieval.max_results = parse_env("RAG_MAX_RESULTS", &v)?;
        }
        if let Some(v) = env("RAG_CONFIDENCE_THRESHOLD") {
            self.retrieval.min_relevance = parse_env("RAG_CONFIDENCE_THRESHOLD", &v)?;
        }
        if self.provider.api_key.is_none() {
            self.provider.api_key = env("MURMUR_API_KEY")
                .or_else(|| env("GEMINI_API_KEY"))
                .or_else(|| env("OPENAI_API_KEY"));
        }
        if let Some(kind) = env("MURMUR_PROVIDER") {
            self.provider.kind = kind;
        }
        if let Some(model) = env("MURMUR_MODEL") {
            self.provider.model = model;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".murmur")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.channel_ids.is_empty() {
            return Err(ConfigError::MissingRequired("DISCORD_CHANNEL_ID".into()));
        }
        if self.discord.token.is_none() {
            return Err(ConfigError::MissingRequired("DISCORD_USER_TOKEN".into()));
        }
        if self.agent.my_user_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired("MY_USER_ID".into()));
        }
        if self.discord.fetch_limit == 0 || self.discord.fetch_limit > 100 {
            return Err(ConfigError::ValidationError(
                "discord.fetch_limit must be between 1 and 100".into(),
            ));
        }
        if self.discord.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "discord.poll_interval_secs must be > 0".into(),
            ));
        }

        let cooldown = &self.cooldown;
        if cooldown.min_delay_secs > cooldown.max_delay_secs {
            return Err(ConfigError::ValidationError(format!(
                "min_delay_secs ({}) must not exceed max_delay_secs ({})",
                cooldown.min_delay_secs, cooldown.max_delay_secs
            )));
        }
        if cooldown.fallback_delay_secs >= cooldown.min_delay_secs {
            return Err(ConfigError::ValidationError(format!(
                "fallback_delay_secs ({}) must be shorter than min_delay_secs ({})",
                cooldown.fallback_delay_secs, cooldown.min_delay_secs
            )));
        }
        // A zero action cap disables the sliding window
        if cooldown.max_actions_per_window > 0 && cooldown.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cooldown.window_secs must be > 0 when max_actions_per_window is set".into(),
            ));
        }

        if self.context.limit == 0 {
            return Err(ConfigError::ValidationError("context.limit must be > 0".into()));
        }
        if self.retrieval.max_results == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.max_results must be > 0".into(),
            ));
        }
        if self.retrieval.chunk_chars == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.chunk_chars must be > 0".into(),
            ));
        }
        if let Some(url) = self
            .retrieval
            .base_urls
            .iter()
            .find(|u| !(u.starts_with("http://") || u.starts_with("https://")))
        {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.base_urls entry '{url}' must start with http:// or https://"
            )));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider.timeout_secs must be > 0".into(),
            ));
        }
        if !matches!(self.memory.backend.as_str(), "sqlite" | "in_memory") {
            return Err(ConfigError::InvalidValue {
                key: "memory.backend".into(),
                value: self.memory.backend.clone(),
                reason: "expected \"sqlite\" or \"in_memory\"".into(),
            });
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
        reason: e.to_string(),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Missing required setting: {0}")]
    MissingRequired(String),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn runnable() -> AppConfig {
        let mut config = AppConfig::default();
        config.discord.token = Some("token".into());
        config.discord.channel_ids = vec!["100".into()];
        config.agent.my_user_id = "42".into();
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.cooldown.min_delay_secs, 120);
        assert_eq!(config.cooldown.max_delay_secs, 420);
        assert_eq!(config.cooldown.fallback_delay_secs, 30);
        assert_eq!(config.discord.poll_interval_secs, 30);
        assert_eq!(config.retrieval.max_results, 8);
        assert_eq!(config.provider.kind, "gemini");
    }

    #[test]
    fn defaults_need_credentials() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));
        assert!(runnable().validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = runnable();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.discord.channel_ids, config.discord.channel_ids);
        assert_eq!(parsed.agent.avoid_words, config.agent.avoid_words);
    }

    #[test]
    fn base_urls_parse_and_must_be_http() {
        let mut config: AppConfig = toml::from_str(
            "[retrieval]\nbase_urls = [\"https://docs.example.org/bridge\"]\n",
        )
        .unwrap();
        assert_eq!(config.retrieval.base_urls, vec!["https://docs.example.org/bridge"]);
        assert!(AppConfig::default().retrieval.base_urls.is_empty());

        config.discord = runnable().discord;
        config.agent.my_user_id = "42".into();
        assert!(config.validate().is_ok());

        config.retrieval.base_urls.push("docs/bridge.md".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("docs/bridge.md"));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env_of(&[
                ("DISCORD_CHANNEL_ID", "111, 222,,333"),
                ("DISCORD_USER_TOKEN", "abc"),
                ("MY_USER_ID", "42"),
                ("AGENT_NAME", "Nova"),
                ("MIN_DELAY_SECONDS", "60"),
                ("MAX_DELAY_SECONDS", "300"),
                ("CONTEXT_LIMIT", "3"),
                ("RAG_CONFIDENCE_THRESHOLD", "0.78"),
                ("GEMINI_API_KEY", "g-key"),
            ]))
            .unwrap();
        assert_eq!(config.discord.channel_ids, vec!["111", "222", "333"]);
        assert_eq!(config.agent.name, "Nova");
        assert_eq!(config.cooldown.min_delay_secs, 60);
        assert_eq!(config.cooldown.max_delay_secs, 300);
        assert_eq!(config.context.limit, 3);
        assert!((config.retrieval.min_relevance - 0.78).abs() < f32::EPSILON);
        assert_eq!(config.provider.api_key.as_deref(), Some("g-key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_file_api_key_beats_env() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("from-file".into());
        config
            .apply_env_overrides(env_of(&[("GEMINI_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn unparseable_env_value_is_invalid() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(env_of(&[("MIN_DELAY_SECONDS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MIN_DELAY_SECONDS"));
    }

    #[test]
    fn min_above_max_rejected() {
        let mut config = runnable();
        config.cooldown.min_delay_secs = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fallback_must_be_shorter_than_min() {
        let mut config = runnable();
        config.cooldown.fallback_delay_secs = config.cooldown.min_delay_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = runnable();
        config.provider.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_memory_backend_rejected() {
        let mut config = runnable();
        config.memory.backend = "postgres".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.model, "gemini-1.5-flash");
    }

    #[test]
    fn load_with_reads_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[discord]
channel_ids = ["900"]
poll_interval_secs = 10

[agent]
my_user_id = "7"
trigger_patterns = ["(?i)anyone know"]

[cooldown]
min_delay_secs = 90
"#,
        )
        .unwrap();

        let config =
            AppConfig::load_with(&path, env_of(&[("DISCORD_USER_TOKEN", "tok")])).unwrap();
        assert_eq!(config.discord.channel_ids, vec!["900"]);
        assert_eq!(config.discord.poll_interval_secs, 10);
        assert_eq!(config.cooldown.min_delay_secs, 90);
        assert_eq!(config.cooldown.max_delay_secs, 420);
        assert_eq!(config.agent.trigger_patterns.len(), 1);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[discord\nchannel_ids = 1").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = runnable();
        config.provider.api_key = Some("sk-secret".into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("\"token\""));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gemini"));
        assert!(toml_str.contains("min_delay_secs"));
    }
}
