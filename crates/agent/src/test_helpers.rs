//! Shared test helpers for pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_core::channel::{ChannelId, ChatTransport};
use murmur_core::error::{GenerationError, TransportError};
use murmur_core::message::{Message, compare_snowflakes};
use murmur_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// A mock provider that returns a sequence of scripted results.
///
/// Each call to `complete` returns the next result in the queue.
/// Panics if more calls are made than results provided.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Duration,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long (on the tokio clock) before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    /// A provider whose single call fails with a network error.
    pub fn failing() -> Self {
        Self::new(vec![Err(GenerationError::Network("connection refused".into()))])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, GenerationError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(result) => result.map(|text| make_text_response(&text)),
            None => panic!("SequentialMockProvider: no more responses (call #{call})"),
        }
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A message sent through [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: ChannelId,
    pub content: String,
    pub reply_to: Option<String>,
}

/// In-process chat transport with scripted inbound messages.
pub struct MockTransport {
    my_user_id: String,
    inbox: Mutex<HashMap<ChannelId, Vec<Message>>>,
    sent: Mutex<Vec<SentMessage>>,
    fail_sends: AtomicBool,
    failing_fetches: AtomicU32,
    next_id: AtomicU64,
    now: Mutex<DateTime<Utc>>,
}

impl MockTransport {
    pub fn new(my_user_id: &str) -> Self {
        Self {
            my_user_id: my_user_id.to_string(),
            inbox: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            failing_fetches: AtomicU32::new(0),
            next_id: AtomicU64::new(900_000),
            now: Mutex::new(Utc::now()),
        }
    }

    /// Make a message visible to `fetch_new_messages`.
    pub fn push_inbound(&self, message: Message) {
        self.inbox
            .lock()
            .unwrap()
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` fetches with a lost connection.
    pub fn fail_next_fetches(&self, count: u32) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Timestamp given to messages the agent sends.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_new_messages(
        &self,
        channel: &ChannelId,
        since: Option<&str>,
    ) -> Result<Vec<Message>, TransportError> {
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::ConnectionLost("scripted outage".into()));
        }
        let inbox = self.inbox.lock().unwrap();
        let mut out: Vec<Message> = inbox
            .get(channel)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| since.is_none_or(|s| compare_snowflakes(&m.id, s).is_gt()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.arrival_cmp(b));
        Ok(out)
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::DeliveryFailed {
                channel: channel.to_string(),
                reason: "scripted failure".into(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            channel: channel.clone(),
            content: content.to_string(),
            reply_to: reply_to.map(String::from),
        });

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut message = Message::new(
            id,
            channel.clone(),
            self.my_user_id.clone(),
            content,
            *self.now.lock().unwrap(),
        )
        .from_agent();
        message.reply_to_id = reply_to.map(String::from);
        Ok(message)
    }
}
