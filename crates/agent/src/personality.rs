//! The agent's persona and reply format instructions.

use murmur_config::AgentConfig;

/// Marker preceding the final reply in the Analyze/Plan/Response layout.
pub const RESPONSE_MARKER: &str = "Response:";

/// Who the agent is and how it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Personality {
    pub name: String,
    pub description: String,
    pub avoid_words: Vec<String>,
}

impl Personality {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            avoid_words: Vec::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.personality.clone(),
            avoid_words: config.avoid_words.clone(),
        }
    }

    pub fn with_avoid_words(mut self, words: Vec<String>) -> Self {
        self.avoid_words = words;
        self
    }

    /// The system preamble: persona, style rules, and the reply format.
    pub fn preamble(&self) -> String {
        let mut out = format!(
            "You are {}, {}, taking part in a Discord conversation.\n\
             Keep replies brief and natural, like a real chat message. \
             Do not sound robotic or formal. Avoid emojis unless the conversation uses them.\n",
            self.name, self.description
        );

        if !self.avoid_words.is_empty() {
            out.push_str("Never use these words:\n");
            for word in &self.avoid_words {
                out.push_str("- ");
                out.push_str(word);
                out.push('\n');
            }
        }

        out.push_str(
            "\nThink it through before answering:\n\
             1) Analyze: what the message is asking or saying, and whether the knowledge provided applies.\n\
             2) Plan: what a helpful, engaging reply would contain.\n\
             3) Respond: write the reply itself.\n\
             \nFormat your answer as:\n\
             Analyze: [your analysis]\n\
             Plan: [your plan]\n",
        );
        out.push_str(RESPONSE_MARKER);
        out.push_str(" [your final reply]");
        out
    }
}
