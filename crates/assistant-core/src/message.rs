use std::fmt;

use assistant_stream::ChatResponse;
use chrono::{DateTime, Utc};

/// Author of a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Which buffer is authoritative for the visible `content` of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Thinking,
    Answer,
}

/// Opaque message identifier: UTC date (`YYYYMMDD`) plus a 4-digit random suffix.
///
/// Uniqueness is only guaranteed within one [`Transcript`](crate::Transcript),
/// which re-draws the suffix on collision.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn generate(now: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().as_u128() % 10_000;
        Self(format!("{}{suffix:04}", now.format("%Y%m%d")))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Structured payload carried by a single-shot response.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Attachments {
    pub data: Option<serde_json::Value>,
    pub sql: Option<String>,
    pub chart_type: Option<String>,
    pub chart_config: Option<serde_json::Value>,
    pub operation_result: Option<serde_json::Value>,
}

impl Attachments {
    /// Copies the structured fields of `response`, or `None` when it has none.
    pub fn from_response(response: &ChatResponse) -> Option<Self> {
        let attachments = Self {
            data: response.data.clone(),
            sql: response.sql.clone(),
            chart_type: response.chart_type.clone(),
            chart_config: response.chart_config.clone(),
            operation_result: response.operation_result.clone(),
        };
        (attachments != Self::default()).then_some(attachments)
    }
}

/// One transcript entry.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub thinking_content: Option<String>,
    pub display_state: DisplayState,
    /// Short status marker shown next to the content.
    pub summary: Option<String>,
    pub attachments: Option<Attachments>,
    pub timestamp: DateTime<Utc>,
}

/// Fields of a message that does not exist yet; the transcript assigns id and timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageDraft {
    pub role: Role,
    pub content: String,
    pub display_state: DisplayState,
    pub attachments: Option<Attachments>,
}

impl MessageDraft {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            display_state: DisplayState::Answer,
            attachments: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            display_state: DisplayState::Answer,
            attachments: None,
        }
    }

    /// Empty assistant entry awaiting streamed fragments.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            display_state: DisplayState::Thinking,
            attachments: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Option<Attachments>) -> Self {
        self.attachments = attachments;
        self
    }

    pub(crate) fn into_message(self, id: MessageId, timestamp: DateTime<Utc>) -> ConversationMessage {
        ConversationMessage {
            id,
            role: self.role,
            content: self.content,
            thinking_content: None,
            display_state: self.display_state,
            summary: None,
            attachments: self.attachments,
            timestamp,
        }
    }
}

/// Partial update merged into an existing message; `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub thinking_content: Option<String>,
    pub display_state: Option<DisplayState>,
    pub summary: Option<String>,
}

impl MessagePatch {
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn thinking_content(mut self, thinking: impl Into<String>) -> Self {
        self.thinking_content = Some(thinking.into());
        self
    }

    pub fn display_state(mut self, state: DisplayState) -> Self {
        self.display_state = Some(state);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns a new message value with the patch merged over `message`.
    ///
    /// Identity fields (`id`, `role`, `timestamp`) are never touched.
    pub fn merged_into(&self, message: &ConversationMessage) -> ConversationMessage {
        let mut updated = message.clone();
        if let Some(content) = &self.content {
            updated.content = content.clone();
        }
        if let Some(thinking) = &self.thinking_content {
            updated.thinking_content = Some(thinking.clone());
        }
        if let Some(state) = self.display_state {
            updated.display_state = state;
        }
        if let Some(summary) = &self.summary {
            updated.summary = Some(summary.clone());
        }
        updated
    }
}
