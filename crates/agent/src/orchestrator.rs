//! The control loop tying the pipeline together.
//!
//! Per inbound message:
//!
//! 1. Commit it to the store
//! 2. Skip it if the agent wrote it
//! 3. Stop if the channel is cooling down
//! 4. Skip it if the agent already replied to it
//! 5. Re-read the conversation window and classify
//! 6. Begin an action, retrieve knowledge, assemble, generate
//! 7. Send as a reply, commit the sent message, arm the cooldown
//!
//! Generation and send failures arm only the short fallback cooldown.
//! Cooldowns are stamped when the action completes, not when the turn began.
//! Every error is handled here; a failing channel never affects another.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use murmur_config::AppConfig;
use murmur_core::channel::{ChannelId, ChatTransport};
use murmur_core::error::{Error, StoreError, TransportError};
use murmur_core::knowledge::KnowledgeSourceRegistry;
use murmur_core::message::{ConversationWindow, Message};
use murmur_core::provider::Provider;
use murmur_core::store::ContextStore;
use murmur_memory::StoreKnowledgeSource;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::{AssemblyInput, ContextAssembler, ContextBudget};
use crate::cooldown::{CooldownPolicy, CooldownScheduler};
use crate::generator::ResponseGenerator;
use crate::intent::{IntentClassifier, ResponseMode};
use crate::personality::Personality;
use crate::retriever::KnowledgeRetriever;

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub channels: Vec<ChannelId>,
    pub my_user_id: String,
    pub context_limit: usize,
    pub max_results: usize,
    pub poll_interval: Duration,
    pub respond_to_backlog: bool,
    pub commit_retries: u32,
    pub retry_backoff: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            channels: config
                .discord
                .channel_ids
                .iter()
                .map(|c| ChannelId::from(c.as_str()))
                .collect(),
            my_user_id: config.agent.my_user_id.clone(),
            context_limit: config.context.limit,
            max_results: config.retrieval.max_results,
            poll_interval: Duration::from_secs(config.discord.poll_interval_secs),
            respond_to_backlog: config.agent.respond_to_backlog,
            commit_retries: config.memory.commit_retries,
            retry_backoff: Duration::from_millis(config.memory.retry_backoff_ms),
        }
    }
}

/// Pipeline stage where a turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Store,
    Generation,
    Transport,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Written by the agent itself
    OwnMessage,
    /// The channel is not ready for another action
    CoolingDown,
    /// An agent reply to this message already exists
    AlreadyReplied,
    /// The classifier decided not to respond
    Ignored { reason: String },
    /// A reply was sent
    Replied {
        message_id: String,
        mode: ResponseMode,
        delay_secs: u64,
    },
    /// The turn was abandoned
    Failed { stage: FailureStage, error: String },
}

/// Drives every monitored channel.
pub struct Orchestrator {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn ContextStore>,
    scheduler: Arc<CooldownScheduler>,
    classifier: IntentClassifier,
    retriever: KnowledgeRetriever,
    assembler: ContextAssembler,
    generator: ResponseGenerator,
    personality: Personality,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn ContextStore>,
        scheduler: Arc<CooldownScheduler>,
        classifier: IntentClassifier,
        retriever: KnowledgeRetriever,
        generator: ResponseGenerator,
        personality: Personality,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            transport,
            store,
            scheduler,
            classifier,
            retriever,
            assembler: ContextAssembler::default(),
            generator,
            personality,
            settings,
        }
    }

    /// Wire the whole pipeline from configuration.
    ///
    /// Knowledge comes from the store; the same backend serves generation,
    /// optional LLM intent, query embeddings and refinement.
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn ContextStore>,
        provider: Arc<dyn Provider>,
    ) -> Result<Self, Error> {
        let mut classifier = IntentClassifier::new(
            config.agent.my_user_id.clone(),
            &config.agent.name,
            &config.agent.trigger_patterns,
        )?;
        if config.agent.llm_intent {
            classifier = classifier.with_llm(Arc::clone(&provider), config.provider.model.clone());
        }

        let sources = KnowledgeSourceRegistry::new()
            .with(Arc::new(StoreKnowledgeSource::new(Arc::clone(&store))));
        let retriever = KnowledgeRetriever::from_config(
            sources,
            &config.retrieval,
            Arc::clone(&provider),
            &config.provider.model,
        );

        let scheduler = Arc::new(CooldownScheduler::new(CooldownPolicy::from_config(
            &config.cooldown,
        )));

        Ok(Self::new(
            transport,
            store,
            scheduler,
            classifier,
            retriever,
            ResponseGenerator::from_config(provider, &config.provider),
            Personality::from_config(&config.agent),
            OrchestratorSettings::from_config(config),
        )
        .with_budget(ContextBudget::from_config(&config.context)))
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.assembler = ContextAssembler::new(budget);
        self
    }

    pub fn scheduler(&self) -> &Arc<CooldownScheduler> {
        &self.scheduler
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn is_own(&self, message: &Message) -> bool {
        message.is_from_agent
            || (!self.settings.my_user_id.is_empty() && message.author_id == self.settings.my_user_id)
    }

    /// Insert with bounded retries. `Ok(false)` means already stored.
    async fn commit(&self, message: &Message) -> Result<bool, StoreError> {
        let mut attempt = 0;
        loop {
            match self.store.insert_message(message).await {
                Ok(inserted) => return Ok(inserted),
                Err(e) if attempt < self.settings.commit_retries => {
                    attempt += 1;
                    warn!(
                        channel = %message.channel_id,
                        message_id = %message.id,
                        attempt,
                        error = %e,
                        "Commit failed, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) => {
                    error!(
                        channel = %message.channel_id,
                        message_id = %message.id,
                        error = %e,
                        "Commit failed, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn reply_parent(&self, message: &Message, window: &ConversationWindow) -> Option<Message> {
        let parent_id = message.reply_to_id.as_deref()?;
        if let Some(found) = window.find(parent_id) {
            return Some(found.clone());
        }
        match self.store.get_message(&message.channel_id, parent_id).await {
            Ok(parent) => parent,
            Err(e) => {
                debug!(message_id = %message.id, error = %e, "Reply parent lookup failed");
                None
            }
        }
    }

    /// Run one turn for an inbound message.
    ///
    /// `now` is the turn's start on the caller's clock; the cooldown is armed
    /// at `now` plus the time the turn took.
    pub async fn handle_message(&self, message: &Message, now: DateTime<Utc>) -> TurnOutcome {
        let started = Instant::now();
        let channel = &message.channel_id;

        // Commit errors are logged inside `commit`; the turn proceeds regardless
        let _ = self.commit(message).await;

        if self.is_own(message) {
            return TurnOutcome::OwnMessage;
        }
        if !self.scheduler.is_ready(channel, now) {
            debug!(channel = %channel, message_id = %message.id, "Channel cooling down");
            return TurnOutcome::CoolingDown;
        }

        match self.store.has_agent_reply(channel, &message.id).await {
            Ok(true) => return TurnOutcome::AlreadyReplied,
            Ok(false) => {}
            Err(e) => {
                warn!(channel = %channel, error = %e, "Idempotency check failed, skipping turn");
                return TurnOutcome::Failed {
                    stage: FailureStage::Store,
                    error: e.to_string(),
                };
            }
        }

        let window = match self.store.window(channel, self.settings.context_limit).await {
            Ok(window) => window,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Window read failed, skipping turn");
                return TurnOutcome::Failed {
                    stage: FailureStage::Store,
                    error: e.to_string(),
                };
            }
        };
        let parent = self.reply_parent(message, &window).await;

        let decision = self
            .classifier
            .classify(message, &window, parent.as_ref())
            .await;
        if !decision.should_respond {
            debug!(message_id = %message.id, reason = %decision.reason, "Not responding");
            return TurnOutcome::Ignored {
                reason: decision.reason,
            };
        }

        if !self.scheduler.try_begin(channel, now) {
            return TurnOutcome::CoolingDown;
        }
        info!(
            channel = %channel,
            message_id = %message.id,
            mode = %decision.mode,
            reason = %decision.reason,
            "Responding"
        );

        let knowledge = self
            .retriever
            .retrieve(&message.content, self.settings.max_results)
            .await;
        let prompt = self.assembler.assemble(&AssemblyInput {
            trigger: message,
            window: &window,
            reply_parent: parent.as_ref(),
            knowledge: &knowledge,
            personality: &self.personality,
        });
        debug!(
            knowledge = prompt.knowledge.len(),
            history = prompt.history.len(),
            utilization_pct = prompt.metadata.utilization_pct,
            "Context assembled"
        );

        let reply = match self.generator.generate(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                let delay = self.scheduler.mark_failed(channel, completed_at(now, started));
                warn!(channel = %channel, error = %e, delay_secs = delay, "Generation failed");
                return TurnOutcome::Failed {
                    stage: FailureStage::Generation,
                    error: e.to_string(),
                };
            }
        };

        let sent = match self
            .transport
            .send_message(channel, &reply, Some(&message.id))
            .await
        {
            Ok(sent) => sent,
            Err(e) => {
                let delay = self.scheduler.mark_failed(channel, completed_at(now, started));
                warn!(channel = %channel, error = %e, delay_secs = delay, "Send failed");
                return TurnOutcome::Failed {
                    stage: FailureStage::Transport,
                    error: e.to_string(),
                };
            }
        };

        // The reply is out; a failed commit must not re-arm a short cooldown
        let acted_at = completed_at(now, started);
        let _ = self.commit(&sent).await;
        let delay = self.scheduler.mark_acted(channel, acted_at);
        info!(
            channel = %channel,
            message_id = %sent.id,
            delay_secs = delay,
            "Reply sent"
        );

        TurnOutcome::Replied {
            message_id: sent.id,
            mode: decision.mode,
            delay_secs: delay,
        }
    }

    /// One poll cycle for a channel. Returns the outcomes of evaluated turns.
    ///
    /// `cursor` is advanced to the newest fetched message. When `backfill`
    /// is set, messages are committed without being answered. A failed fetch
    /// leaves `cursor` untouched.
    pub async fn poll_channel(
        &self,
        channel: &ChannelId,
        cursor: &mut Option<String>,
        backfill: bool,
    ) -> Result<Vec<TurnOutcome>, TransportError> {
        let messages = self
            .transport
            .fetch_new_messages(channel, cursor.as_deref())
            .await
            .inspect_err(|e| {
                warn!(channel = %channel, error = %e, "Fetch failed, retrying next cycle");
            })?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        debug!(channel = %channel, count = messages.len(), backfill, "Fetched messages");

        let mut outcomes = Vec::new();
        let mut gate_closed = backfill;
        for message in &messages {
            if gate_closed {
                let _ = self.commit(message).await;
                continue;
            }
            let outcome = self.handle_message(message, Utc::now()).await;
            if outcome == TurnOutcome::CoolingDown {
                gate_closed = true;
            }
            outcomes.push(outcome);
        }

        if let Some(last) = messages.last() {
            *cursor = Some(last.id.clone());
        }
        Ok(outcomes)
    }

    /// Wait before the next poll, stretched by a platform rate-limit hint.
    fn next_poll_delay(&self, result: &Result<Vec<TurnOutcome>, TransportError>) -> Duration {
        match result {
            Err(TransportError::RateLimited { retry_after_secs }) => {
                self.settings.poll_interval + Duration::from_secs(*retry_after_secs)
            }
            _ => self.settings.poll_interval,
        }
    }

    async fn run_channel(self: Arc<Self>, channel: ChannelId, mut shutdown: watch::Receiver<bool>) {
        let mut cursor = match self.store.latest_message_id(&channel).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Cursor lookup failed, starting fresh");
                None
            }
        };
        let mut first = true;
        info!(channel = %channel, cursor = ?cursor, "Channel task started");

        loop {
            let backfill = first && !self.settings.respond_to_backlog;
            let result = self.poll_channel(&channel, &mut cursor, backfill).await;
            // The backlog stays unanswered until one fetch has gone through
            if result.is_ok() {
                first = false;
            }
            let delay = self.next_poll_delay(&result);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!(channel = %channel, "Channel task stopped");
    }

    /// Run one task per channel until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        for channel in self.settings.channels.clone() {
            tasks.spawn(Arc::clone(&self).run_channel(channel, shutdown.clone()));
        }
        info!(channels = tasks.len(), "Orchestrator running");

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Channel task aborted");
            }
        }
        info!("Orchestrator stopped");
    }
}

/// `now` advanced by the time elapsed since `started`.
fn completed_at(now: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    chrono::Duration::from_std(started.elapsed())
        .map(|elapsed| now + elapsed)
        .unwrap_or(now)
}
