use std::fmt;

/// Which accumulation buffer a stream fragment belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Intermediate reasoning text.
    Thinking,
    /// Final answer text.
    Answer,
    /// Application-level error reported by the backend mid-stream.
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Thinking => "thinking",
            Self::Answer => "answer",
            Self::Error => "error",
        })
    }
}

/// One typed fragment of an in-progress assistant response.
///
/// `content` is always a delta to append, never a replacement.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: String,
}

impl StreamEvent {
    pub fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::new(EventKind::Thinking, content)
    }

    pub fn answer(content: impl Into<String>) -> Self {
        Self::new(EventKind::Answer, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(EventKind::Error, content)
    }
}

/// Body of `POST /chat/stream`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamRequest {
    pub message: String,
    pub mode: String,
    pub session_id: String,
}

impl StreamRequest {
    pub fn new(
        message: impl Into<String>,
        mode: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            mode: mode.into(),
            session_id: session_id.into(),
        }
    }
}

/// Body of `POST /chat`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub mode: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            mode: mode.into(),
        }
    }
}

/// Response of `POST /chat`. Every field is optional on the wire.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_result: Option<serde_json::Value>,
}

impl ChatResponse {
    /// Display text for the response, preferring `html` over `text`.
    ///
    /// Empty strings count as absent.
    pub fn display_text(&self) -> Option<&str> {
        self.html
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.text.as_deref().filter(|s| !s.is_empty()))
    }
}
