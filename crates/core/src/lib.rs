//! # Murmur Core
//!
//! Domain types, traits, and error definitions for the Murmur conversational
//! agent. This crate has **no I/O of its own**: it defines the model that the
//! transport, provider, store and pipeline crates implement against.
//!
//! Every external collaborator is a trait here:
//! - [`ChatTransport`]: fetch and send chat messages
//! - [`Provider`]: text completion, classification, embeddings
//! - [`ContextStore`]: conversation history and knowledge fragments
//! - [`KnowledgeSource`]: candidate fragments for retrieval

pub mod channel;
pub mod error;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use channel::{ChannelId, ChatTransport};
pub use error::{Error, GenerationError, Result, StoreError, TransportError};
pub use knowledge::{KnowledgeQuery, KnowledgeSource, KnowledgeSourceRegistry};
pub use message::{ConversationWindow, Message, PromptMessage, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use store::{ContextStore, FragmentFilter, KnowledgeFragment, StoreStats};
