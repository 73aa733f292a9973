//! Prompt context assembly.
//!
//! | Layer | Source | Trim strategy |
//! |-------|--------|---------------|
//! | Preamble | Personality | Never trimmed |
//! | Knowledge | Retriever | Lowest relevance dropped first |
//! | History | Conversation window | Oldest turns dropped |
//! | Reply parent | Store or window | Never trimmed |
//! | Trigger | Incoming message | Never trimmed |

pub mod assembler;

pub use assembler::{
    AssemblyInput, AssemblyMetadata, ContextAssembler, ContextBudget, DropInfo, LayerStats,
    PromptStructure,
};
