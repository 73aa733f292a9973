//! The Murmur response-decision pipeline.
//!
//! For each monitored channel the [`Orchestrator`] polls for new messages and
//! runs every one through the pipeline:
//!
//! 1. **Commit** the message to the context store
//! 2. **Gate** on the channel's [`CooldownScheduler`]
//! 3. **Classify** with the [`IntentClassifier`]
//! 4. **Retrieve** knowledge with the [`KnowledgeRetriever`]
//! 5. **Assemble** a bounded prompt with the [`ContextAssembler`]
//! 6. **Generate** a reply with the [`ResponseGenerator`]
//! 7. **Send**, commit the reply, and arm the cooldown

pub mod context;
pub mod cooldown;
pub mod generator;
pub mod intent;
pub mod orchestrator;
pub mod personality;
pub mod retriever;

#[cfg(test)]
mod test_helpers;

pub use context::{
    AssemblyInput, AssemblyMetadata, ContextAssembler, ContextBudget, DropInfo, LayerStats,
    PromptStructure,
};
pub use cooldown::{ChannelState, CooldownPolicy, CooldownScheduler, Phase};
pub use generator::{ResponseGenerator, extract_reply};
pub use intent::{IntentClassifier, ResponseDecision, ResponseMode};
pub use orchestrator::{FailureStage, Orchestrator, OrchestratorSettings, TurnOutcome};
pub use personality::Personality;
pub use retriever::{
    EmbeddingScorer, KeywordOverlapScorer, KnowledgeRetriever, RankedFragment, RelevanceScorer,
};
