use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of conversation history supplied by the chat surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: &str) -> Self {
        Self {
            role: ChatRole::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.to_string(),
        }
    }
}

/// Options for a response-generation call. `workspace_id` is mandatory.
#[derive(Debug, Clone)]
pub struct ResponseOptions {
    pub workspace_id: String,
    pub bot_id: Option<String>,
    pub system_instructions: Option<String>,
    pub categories: Option<Vec<String>>,
    pub include_shared_knowledge: bool,
}

impl ResponseOptions {
    pub fn new(workspace_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            bot_id: None,
            system_instructions: None,
            categories: None,
            include_shared_knowledge: true,
        }
    }

    pub fn with_bot(mut self, bot_id: &str) -> Self {
        self.bot_id = Some(bot_id.to_string());
        self
    }
}

/// The always-well-formed answer object. Every failure path in the responder
/// terminates in one of these; confidence drops as the answer degrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotResponse {
    pub content: String,
    /// Titles of the documents the answer was grounded on.
    pub sources: Vec<String>,
    /// Calibrated confidence in [0, 1].
    pub confidence: f32,
}

impl BotResponse {
    pub fn new(content: String, sources: Vec<String>, confidence: f32) -> Self {
        Self {
            content,
            sources,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}
