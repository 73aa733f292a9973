//! Intent classification: should the agent answer this message, and how.
//!
//! Rule tiers, first match wins:
//!
//! 1. The agent's own message → ignore
//! 2. A reply to an agent-authored message → direct reply
//! 3. The agent's name, a mention of its user ID, or a trigger pattern → contextual
//! 4. Anything else → ignore ("no trigger")
//!
//! When an LLM tier is attached it may override tier 4. Any backend error or
//! unrecognized label leaves the decision at ignore.

use std::sync::Arc;

use murmur_core::error::Error;
use murmur_core::message::{ConversationWindow, Message};
use murmur_core::provider::Provider;
use regex_lite::Regex;
use serde::Serialize;
use tracing::{debug, warn};

/// How the agent should answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseMode {
    DirectReply,
    Contextual,
    Ignore,
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DirectReply => "DIRECT_REPLY",
            Self::Contextual => "CONTEXTUAL",
            Self::Ignore => "IGNORE",
        };
        f.write_str(s)
    }
}

/// The outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseDecision {
    pub should_respond: bool,
    pub mode: ResponseMode,
    pub reason: String,
}

impl ResponseDecision {
    pub fn respond(mode: ResponseMode, reason: impl Into<String>) -> Self {
        Self {
            should_respond: mode != ResponseMode::Ignore,
            mode,
            reason: reason.into(),
        }
    }

    pub fn ignore(reason: impl Into<String>) -> Self {
        Self::respond(ResponseMode::Ignore, reason)
    }
}

struct LlmTier {
    provider: Arc<dyn Provider>,
    model: String,
}

/// Decides whether and how to respond to incoming messages.
pub struct IntentClassifier {
    my_user_id: String,
    name_pattern: Option<Regex>,
    trigger_patterns: Vec<Regex>,
    llm: Option<LlmTier>,
}

impl IntentClassifier {
    /// Build a classifier for the given identity.
    ///
    /// Fails with a configuration error if a trigger pattern is not a valid
    /// regular expression.
    pub fn new(
        my_user_id: impl Into<String>,
        agent_name: &str,
        trigger_patterns: &[String],
    ) -> Result<Self, Error> {
        let name = agent_name.trim();
        let name_pattern = if name.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\b{}\b", regex_lite::escape(name));
            Some(Regex::new(&pattern).map_err(|e| Error::Config {
                message: format!("agent name '{name}' cannot be matched: {e}"),
            })?)
        };

        let trigger_patterns = trigger_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config {
                    message: format!("invalid trigger pattern '{p}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            my_user_id: my_user_id.into(),
            name_pattern,
            trigger_patterns,
            llm: None,
        })
    }

    /// Attach the optional LLM tier.
    pub fn with_llm(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.llm = Some(LlmTier {
            provider,
            model: model.into(),
        });
        self
    }

    fn mentions_me(&self, content: &str) -> bool {
        if self.my_user_id.is_empty() {
            return false;
        }
        content.contains(&format!("<@{}>", self.my_user_id))
            || content.contains(&format!("<@!{}>", self.my_user_id))
    }

    fn is_mine(&self, message: &Message) -> bool {
        message.is_from_agent || (!self.my_user_id.is_empty() && message.author_id == self.my_user_id)
    }

    /// The pure rule tiers.
    pub fn classify_rules(
        &self,
        message: &Message,
        window: &ConversationWindow,
        parent: Option<&Message>,
    ) -> ResponseDecision {
        if self.is_mine(message) {
            return ResponseDecision::ignore("own message");
        }

        if let Some(parent_id) = message.reply_to_id.as_deref() {
            let parent = parent
                .filter(|p| p.id == parent_id)
                .or_else(|| window.find(parent_id));
            if parent.is_some_and(|p| self.is_mine(p)) {
                return ResponseDecision::respond(ResponseMode::DirectReply, "reply to agent");
            }
        }

        if self
            .name_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(&message.content))
        {
            return ResponseDecision::respond(ResponseMode::Contextual, "name mentioned");
        }
        if self.mentions_me(&message.content) {
            return ResponseDecision::respond(ResponseMode::Contextual, "user mention");
        }
        if self.trigger_patterns.iter().any(|re| re.is_match(&message.content)) {
            return ResponseDecision::respond(ResponseMode::Contextual, "trigger pattern");
        }

        ResponseDecision::ignore("no trigger")
    }

    /// Full classification: rule tiers, then the LLM tier if attached.
    pub async fn classify(
        &self,
        message: &Message,
        window: &ConversationWindow,
        parent: Option<&Message>,
    ) -> ResponseDecision {
        let decision = self.classify_rules(message, window, parent);
        if decision.should_respond || self.is_mine(message) {
            return decision;
        }
        let Some(llm) = &self.llm else {
            return decision;
        };

        let prompt = classification_prompt(message, window);
        match llm.provider.classify(&llm.model, &prompt).await {
            Ok(label) => match label.as_str() {
                "respond" | "yes" => {
                    debug!(message_id = %message.id, "LLM tier chose to respond");
                    ResponseDecision::respond(ResponseMode::Contextual, "llm: respond")
                }
                "ignore" | "no" => ResponseDecision::ignore("llm: ignore"),
                other => {
                    debug!(label = other, "Unrecognized classification label");
                    ResponseDecision::ignore("llm: unrecognized label")
                }
            },
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Intent classification failed");
                ResponseDecision::ignore("llm: unavailable")
            }
        }
    }
}

fn classification_prompt(message: &Message, window: &ConversationWindow) -> String {
    let mut recent = String::new();
    for m in window.iter().rev().take(5).rev() {
        if m.id == message.id {
            continue;
        }
        recent.push_str(&format!("{}: {}\n", m.display_author(), m.content));
    }
    format!(
        "You are watching a Discord conversation. Decide whether a regular participant \
         should join in by replying to the latest message.\n\n\
         Recent conversation:\n{recent}\n\
         Latest message from {}: \"{}\"\n\n\
         Answer with exactly one word: respond or ignore.",
        message.display_author(),
        message.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockProvider;
    use chrono::Utc;
    use murmur_core::channel::ChannelId;

    const ME: &str = "4242";

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(ME, "Murmur", &["(?i)anyone know".to_string()]).unwrap()
    }

    fn msg(id: &str, author: &str, content: &str) -> Message {
        Message::new(id, ChannelId::from("c1"), author, content, Utc::now())
    }

    fn empty_window() -> ConversationWindow {
        ConversationWindow::new(ChannelId::from("c1"), 10)
    }

    #[test]
    fn own_message_is_ignored() {
        let c = classifier();
        let d = c.classify_rules(&msg("1", ME, "murmur here"), &empty_window(), None);
        assert_eq!(d, ResponseDecision::ignore("own message"));

        let flagged = msg("2", "other", "hi").from_agent();
        assert!(!c.classify_rules(&flagged, &empty_window(), None).should_respond);
    }

    #[test]
    fn reply_to_agent_is_direct() {
        let c = classifier();
        let mine = msg("10", ME, "staking pays weekly").from_agent();
        let reply = msg("11", "7", "thanks, and fees?").replying_to("10");

        // Parent found in the window
        let window =
            ConversationWindow::from_messages(ChannelId::from("c1"), 10, vec![mine.clone()]);
        let d = c.classify_rules(&reply, &window, None);
        assert_eq!(d.mode, ResponseMode::DirectReply);
        assert!(d.should_respond);

        // Parent supplied separately
        let d = c.classify_rules(&reply, &empty_window(), Some(&mine));
        assert_eq!(d.mode, ResponseMode::DirectReply);
    }

    #[test]
    fn reply_to_someone_else_is_not_direct() {
        let c = classifier();
        let theirs = msg("10", "8", "what's up");
        let reply = msg("11", "7", "nothing").replying_to("10");
        let d = c.classify_rules(&reply, &empty_window(), Some(&theirs));
        assert_eq!(d.mode, ResponseMode::Ignore);
    }

    #[test]
    fn name_matches_whole_word_case_insensitively() {
        let c = classifier();
        let d = c.classify_rules(&msg("1", "7", "hey MURMUR, thoughts?"), &empty_window(), None);
        assert_eq!(d.mode, ResponseMode::Contextual);

        let d = c.classify_rules(&msg("2", "7", "murmuring in the hall"), &empty_window(), None);
        assert_eq!(d.mode, ResponseMode::Ignore);
    }

    #[test]
    fn user_mentions_trigger() {
        let c = classifier();
        for content in ["<@4242> you there?", "ping <@!4242>"] {
            let d = c.classify_rules(&msg("1", "7", content), &empty_window(), None);
            assert_eq!(d.mode, ResponseMode::Contextual, "{content}");
        }
        let d = c.classify_rules(&msg("1", "7", "<@99> hi"), &empty_window(), None);
        assert_eq!(d.mode, ResponseMode::Ignore);
    }

    #[test]
    fn trigger_pattern_matches() {
        let c = classifier();
        let d = c.classify_rules(&msg("1", "7", "Anyone know the APY?"), &empty_window(), None);
        assert_eq!(d.reason, "trigger pattern");
    }

    #[test]
    fn no_trigger_is_ignored() {
        let d = classifier().classify_rules(&msg("1", "7", "lol"), &empty_window(), None);
        assert_eq!(d, ResponseDecision::ignore("no trigger"));
    }

    #[test]
    fn invalid_trigger_pattern_is_config_error() {
        let err = IntentClassifier::new(ME, "murmur", &["(unclosed".to_string()]);
        assert!(matches!(err, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn llm_tier_can_promote() {
        let provider = Arc::new(SequentialMockProvider::texts(&["Respond."]));
        let c = classifier().with_llm(provider.clone(), "mock-model");
        let d = c.classify(&msg("1", "7", "the bridge is slow today"), &empty_window(), None).await;
        assert_eq!(d.mode, ResponseMode::Contextual);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn llm_tier_fails_safe() {
        let c = classifier().with_llm(Arc::new(SequentialMockProvider::texts(&["maybe"])), "m");
        let d = c.classify(&msg("1", "7", "hmm"), &empty_window(), None).await;
        assert_eq!(d.mode, ResponseMode::Ignore);

        let c = classifier().with_llm(Arc::new(SequentialMockProvider::failing()), "m");
        let d = c.classify(&msg("1", "7", "hmm"), &empty_window(), None).await;
        assert_eq!(d.mode, ResponseMode::Ignore);
    }

    #[tokio::test]
    async fn llm_tier_not_consulted_for_rule_matches() {
        let provider = Arc::new(SequentialMockProvider::texts(&[]));
        let c = classifier().with_llm(provider.clone(), "m");
        let d = c.classify(&msg("1", ME, "mine"), &empty_window(), None).await;
        assert_eq!(d.reason, "own message");
        let d = c.classify(&msg("2", "7", "murmur?"), &empty_window(), None).await;
        assert_eq!(d.mode, ResponseMode::Contextual);
        assert_eq!(provider.call_count(), 0);
    }
}
