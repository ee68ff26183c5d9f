use std::fmt;
use std::str::FromStr;

use crate::errors::ConversationError;

/// Conversation mode sent with every request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChatMode {
    /// Everyday conversation, single-shot.
    #[default]
    #[serde(rename = "chat")]
    Chat,
    /// Deep reasoning, streamed with thinking fragments.
    #[serde(rename = "focus")]
    Focus,
    /// Database queries and operations, single-shot with structured results.
    #[serde(rename = "text2sql")]
    Text2Sql,
}

impl ChatMode {
    pub const ALL: [ChatMode; 3] = [ChatMode::Chat, ChatMode::Focus, ChatMode::Text2Sql];

    /// Wire identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Focus => "focus",
            Self::Text2Sql => "text2sql",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Chat => "Chat",
            Self::Focus => "Focus",
            Self::Text2Sql => "Database",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Chat => "everyday conversation",
            Self::Focus => "deep reasoning, streamed",
            Self::Text2Sql => "database queries and operations",
        }
    }

    /// Input hint shown while this mode is active.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Chat => "Chat about your day...",
            Self::Focus => "Tell me which truth of the world you want to understand...",
            Self::Text2Sql => "Enter a data request, e.g. list all students...",
        }
    }

    /// Whether this mode uses the streamed exchange.
    pub fn is_streamed(&self) -> bool {
        matches!(self, Self::Focus)
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = ConversationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| ConversationError::UnknownMode(s.to_string()))
    }
}
