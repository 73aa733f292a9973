//! Context assembly: builds a bounded prompt for one turn.
//!
//! Layers, in prompt order:
//!
//! 1. **Preamble** (personality, style, reply format): never dropped
//! 2. **Knowledge** (ranked fragments): lowest relevance dropped first
//! 3. **History** (channel window, trigger excluded): oldest turns dropped
//! 4. **Reply parent** (quoted message being replied to): never dropped
//! 5. **Trigger** (the message to answer): never dropped
//!
//! The budget is counted in characters. Knowledge is trimmed to its optional
//! cap first; then, while knowledge + history exceed what the fixed layers
//! leave over, fragments are dropped before any history turn.
//!
//! Assembly is deterministic: identical inputs produce identical output.

use murmur_config::ContextConfig;
use murmur_core::message::{ConversationWindow, Message, PromptMessage};
use serde::{Deserialize, Serialize};

use crate::personality::Personality;
use crate::retriever::RankedFragment;

// ── Types ─────────────────────────────────────────────────────────────────

/// Character budget for an assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    /// Total characters across all layers.
    pub total_chars: usize,
    /// Optional cap on the knowledge layer.
    pub knowledge_chars: Option<usize>,
}

impl ContextBudget {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            total_chars: config.budget_chars,
            knowledge_chars: config.knowledge_chars,
        }
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

/// All inputs for assembling one turn.
pub struct AssemblyInput<'a> {
    pub trigger: &'a Message,
    pub window: &'a ConversationWindow,
    pub reply_parent: Option<&'a Message>,
    /// Ranked fragments, most relevant first.
    pub knowledge: &'a [RankedFragment],
    pub personality: &'a Personality,
}

/// The assembled prompt, layer by layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptStructure {
    pub preamble: String,
    /// Rendered fragments, most relevant first.
    pub knowledge: Vec<String>,
    /// Rendered history turns, chronological.
    pub history: Vec<String>,
    pub reply_parent: Option<String>,
    pub trigger: String,
    pub metadata: AssemblyMetadata,
}

/// Sizes, drops and utilization of an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub total_chars: usize,
    pub budget: usize,
    /// 0.0–100.0; above 100 when the fixed layers alone exceed the budget.
    pub utilization_pct: f32,
    pub per_layer: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
}

/// Statistics for a single layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    pub chars: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Items dropped from a layer during budget enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub chars_dropped: usize,
    pub reason: String,
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless; create one and reuse it.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    budget: ContextBudget,
}

fn chars(s: &str) -> usize {
    s.chars().count()
}

fn render_turn(message: &Message) -> String {
    format!("{}: {}", message.display_author(), message.content)
}

fn render_fragment(ranked: &RankedFragment) -> String {
    format!("{} (source: {})", ranked.fragment.text, ranked.fragment.source)
}

impl ContextAssembler {
    pub fn new(budget: ContextBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> ContextBudget {
        self.budget
    }

    pub fn assemble(&self, input: &AssemblyInput<'_>) -> PromptStructure {
        let mut stats = Vec::new();
        let mut drops = Vec::new();

        // ── Fixed layers ──────────────────────────────────────────────────
        let preamble = input.personality.preamble();
        let reply_parent = input
            .reply_parent
            .map(|p| format!("Replying to {}", render_turn(p)));
        let trigger = render_turn(input.trigger);

        let preamble_chars = chars(&preamble);
        let parent_chars = reply_parent.as_deref().map_or(0, chars);
        let trigger_chars = chars(&trigger);
        let reserved = preamble_chars + parent_chars + trigger_chars;
        let remaining = self.budget.total_chars.saturating_sub(reserved);

        // ── Knowledge, capped ─────────────────────────────────────────────
        let mut knowledge: Vec<String> = input.knowledge.iter().map(render_fragment).collect();
        let knowledge_total = knowledge.len();
        let mut knowledge_used: usize = knowledge.iter().map(|k| chars(k)).sum();
        let mut knowledge_dropped = (0usize, 0usize);
        if let Some(cap) = self.budget.knowledge_chars {
            while knowledge_used > cap {
                let Some(last) = knowledge.pop() else { break };
                knowledge_used -= chars(&last);
                knowledge_dropped.0 += 1;
                knowledge_dropped.1 += chars(&last);
            }
        }

        // ── History, trigger excluded ─────────────────────────────────────
        let mut history: Vec<String> = input
            .window
            .iter()
            .filter(|m| m.id != input.trigger.id)
            .map(render_turn)
            .collect();
        let history_total = history.len();
        let mut history_used: usize = history.iter().map(|h| chars(h)).sum();
        let mut history_dropped = (0usize, 0usize);

        // ── Shared budget: knowledge goes first, then oldest history ─────
        let mut oldest = 0;
        while knowledge_used + history_used > remaining {
            if let Some(last) = knowledge.pop() {
                knowledge_used -= chars(&last);
                knowledge_dropped.0 += 1;
                knowledge_dropped.1 += chars(&last);
            } else if oldest < history.len() {
                let c = chars(&history[oldest]);
                history_used -= c;
                history_dropped.0 += 1;
                history_dropped.1 += c;
                oldest += 1;
            } else {
                break;
            }
        }
        history.drain(..oldest);

        // ── Metadata ──────────────────────────────────────────────────────
        stats.push(Self::stats("preamble", preamble_chars, 1, 1));
        stats.push(Self::stats(
            "knowledge",
            knowledge_used,
            knowledge.len(),
            knowledge_total,
        ));
        stats.push(Self::stats("history", history_used, history.len(), history_total));
        let parent_count = usize::from(reply_parent.is_some());
        stats.push(Self::stats("reply_parent", parent_chars, parent_count, parent_count));
        stats.push(Self::stats("trigger", trigger_chars, 1, 1));

        drops.extend(Self::maybe_drop(
            "knowledge",
            knowledge_dropped,
            "Lowest-relevance fragments dropped",
        ));
        drops.extend(Self::maybe_drop(
            "history",
            history_dropped,
            "Oldest turns dropped",
        ));

        let total_chars: usize = stats.iter().map(|s| s.chars).sum();
        let utilization_pct = if self.budget.total_chars == 0 {
            100.0
        } else {
            total_chars as f32 / self.budget.total_chars as f32 * 100.0
        };

        PromptStructure {
            preamble,
            knowledge,
            history,
            reply_parent,
            trigger,
            metadata: AssemblyMetadata {
                total_chars,
                budget: self.budget.total_chars,
                utilization_pct,
                per_layer: stats,
                drops,
            },
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    fn stats(layer: &str, chars: usize, included: usize, total: usize) -> LayerStats {
        LayerStats {
            name: layer.into(),
            chars,
            items_included: included,
            items_total: total,
        }
    }

    fn maybe_drop(layer: &str, (count, chars): (usize, usize), reason: &str) -> Option<DropInfo> {
        (count > 0).then(|| DropInfo {
            layer: layer.into(),
            items_dropped: count,
            chars_dropped: chars,
            reason: reason.into(),
        })
    }
}

impl PromptStructure {
    /// Render into provider messages: one system message (preamble and
    /// knowledge) and one user message (history, parent, trigger).
    pub fn render(&self) -> Vec<PromptMessage> {
        let mut system = self.preamble.clone();
        if !self.knowledge.is_empty() {
            system.push_str("\n\nRelevant information from the knowledge base:\n");
            for (i, entry) in self.knowledge.iter().enumerate() {
                system.push_str(&format!("{}. {}\n", i + 1, entry));
            }
        }

        let mut user = String::new();
        if !self.history.is_empty() {
            user.push_str("Recent conversation:\n");
            for turn in &self.history {
                user.push_str(turn);
                user.push('\n');
            }
            user.push('\n');
        }
        if let Some(parent) = &self.reply_parent {
            user.push_str(parent);
            user.push_str("\n\n");
        }
        user.push_str("The message you need to respond to:\n");
        user.push_str(&self.trigger);

        vec![PromptMessage::system(system), PromptMessage::user(user)]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
