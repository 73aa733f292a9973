//! End-to-end pipeline tests: inbound messages through to sent replies.
//!
//! These wire the orchestrator from an `AppConfig` exactly as the binary
//! does, with a scripted backend and an in-process transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use murmur_agent::{Orchestrator, ResponseMode, TurnOutcome};
use murmur_config::AppConfig;
use murmur_core::channel::{ChannelId, ChatTransport};
use murmur_core::error::{GenerationError, TransportError};
use murmur_core::message::Message;
use murmur_core::provider::{Provider, ProviderRequest, ProviderResponse};
use murmur_core::store::ContextStore;
use murmur_memory::{InMemoryStore, SqliteStore};

const ME: &str = "4242";
const CHANNEL: &str = "1000";

// ── Mocks ────────────────────────────────────────────────────────────────

/// A backend that returns scripted replies in order and records requests.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted");
        Ok(ProviderResponse {
            content,
            usage: None,
            model: request.model,
        })
    }
}

/// A transport that records sends and hands out increasing message IDs.
struct RecordingTransport {
    sent: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<(String, Option<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn fetch_new_messages(
        &self,
        _channel: &ChannelId,
        _since: Option<&str>,
    ) -> Result<Vec<Message>, TransportError> {
        Ok(Vec::new())
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((content.to_string(), reply_to.map(String::from)));
        let id = format!("{}", 5000 + sent.len());
        let mut message = Message::new(id, channel.clone(), ME, content, Utc::now()).from_agent();
        message.reply_to_id = reply_to.map(String::from);
        Ok(message)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn inbound(id: &str, author: &str, name: &str, content: &str, secs: i64) -> Message {
    Message::new(id, ChannelId::from(CHANNEL), author, content, t(secs)).with_author_name(name)
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.discord.channel_ids = vec![CHANNEL.into()];
    config.discord.token = Some("token".into());
    config.agent.my_user_id = ME.into();
    config.agent.name = "murmur".into();
    config.cooldown.min_delay_secs = 60;
    config.cooldown.max_delay_secs = 300;
    config.context.limit = 3;
    config
}

async fn seed_history(store: &dyn ContextStore) {
    for (id, author, name, content, secs) in [
        ("101", "1", "alice", "anyone tried the new bridge?", -90),
        ("102", "2", "bob", "yeah fees were weird", -60),
        ("103", "3", "carol", "gas spiked this morning", -30),
    ] {
        store
            .insert_message(&inbound(id, author, name, content, secs))
            .await
            .unwrap();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn mention_replies_once_then_cooldown_blocks() {
    let store = Arc::new(InMemoryStore::new());
    seed_history(store.as_ref()).await;
    let transport = Arc::new(RecordingTransport::new());
    let provider = Arc::new(ScriptedProvider::new(&[
        "Analyze: bridge fees\nPlan: reassure\nResponse: fees settle down after the spike",
    ]));

    let orchestrator =
        Orchestrator::from_config(&config(), transport.clone(), store.clone(), provider.clone())
            .unwrap();
    let channel = ChannelId::from(CHANNEL);

    // t = 0: a mention gets exactly one contextual reply
    let first = inbound("104", "2", "bob", "murmur are bridge fees always this high?", 0);
    let outcome = orchestrator.handle_message(&first, t(0)).await;
    assert!(
        matches!(
            outcome,
            TurnOutcome::Replied {
                mode: ResponseMode::Contextual,
                ..
            }
        ),
        "{outcome:?}"
    );
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        transport.sent(),
        vec![(
            "fees settle down after the spike".to_string(),
            Some("104".to_string())
        )]
    );

    let state = orchestrator.scheduler().snapshot(&channel, t(0));
    let next = state.next_allowed_at.unwrap();
    assert!(next >= t(60) && next <= t(300), "next_allowed_at = {next}");

    // Window of three: trigger plus the two newest prior messages
    let user_prompt = &provider.last_request().messages[1].content;
    assert!(user_prompt.contains("carol: gas spiked this morning"));
    assert!(user_prompt.contains("bob: yeah fees were weird"));
    assert!(!user_prompt.contains("alice"));

    // t = 30: still cooling down, so no backend call and no send
    let second = inbound("105", "3", "carol", "murmur what about gas?", 30);
    assert_eq!(
        orchestrator.handle_message(&second, t(30)).await,
        TurnOutcome::CoolingDown
    );
    assert_eq!(provider.calls(), 1);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn sqlite_store_prevents_double_reply() {
    let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    seed_history(store.as_ref()).await;
    let transport = Arc::new(RecordingTransport::new());
    let provider = Arc::new(ScriptedProvider::new(&["Response: on it"]));
    let orchestrator =
        Orchestrator::from_config(&config(), transport.clone(), store.clone(), provider.clone())
            .unwrap();

    let trigger = inbound("104", "2", "bob", "hey <@4242>, you around?", 0);
    assert!(matches!(
        orchestrator.handle_message(&trigger, t(0)).await,
        TurnOutcome::Replied { .. }
    ));
    // Long after the cooldown, the same trigger arrives again
    assert_eq!(
        orchestrator.handle_message(&trigger, t(10_000)).await,
        TurnOutcome::AlreadyReplied
    );
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(provider.calls(), 1);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.messages, 5);
}

#[tokio::test]
async fn invalid_trigger_pattern_fails_wiring() {
    let mut config = config();
    config.agent.trigger_patterns = vec!["([".into()];
    let result = Orchestrator::from_config(
        &config,
        Arc::new(RecordingTransport::new()),
        Arc::new(InMemoryStore::new()),
        Arc::new(ScriptedProvider::new(&[])),
    );
    assert!(result.is_err());
}
