//! Per-exchange accumulation state.
//!
//! A [`StreamingSession`] turns each decoded event into a [`MessagePatch`] for
//! the entry it owns. It performs no I/O; the exchange driver applies the
//! patches to the transcript.

use assistant_stream::{EventKind, StreamEvent, TransportError};

use crate::message::{DisplayState, MessageId, MessagePatch};

/// Summary marker attached when a stream ends with reasoning but no answer.
pub const NO_ANSWER_SUMMARY: &str = "🍃 reasoning finished (no answer)";

/// How thinking fragments affect `display_state` before any answer arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ThinkingDisplay {
    /// Every thinking fragment sets `display_state = answer` and only
    /// updates `thinking_content`. Matches existing front-ends.
    #[default]
    FlipToAnswer,
    /// Keep `display_state = thinking` and mirror the thinking text into
    /// `content` until the first answer fragment arrives.
    HoldUntilAnswer,
}

/// Terminal result of one exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The stream completed with at least one answer fragment.
    Answered,
    /// The stream completed with reasoning only.
    ThinkingOnly,
    /// The transport failed; the entry carries a network error annotation.
    Failed(TransportError),
    /// The caller cancelled; the entry was left as last updated.
    Cancelled,
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Answered | Self::ThinkingOnly)
    }
}

/// Lifecycle of one streamed exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    /// Entry created, no fragment received yet.
    Created,
    /// Receiving fragments; carries the buffer that grew last.
    Accumulating(DisplayState),
    /// Terminal.
    Finished(ExchangeOutcome),
}

impl ExchangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Accumulation buffers of one streamed exchange, bound to one transcript entry.
#[derive(Debug)]
pub struct StreamingSession {
    message_id: MessageId,
    thinking: String,
    answer: String,
    display: ThinkingDisplay,
    state: ExchangeState,
    events_applied: u64,
}

impl StreamingSession {
    pub fn new(message_id: MessageId, display: ThinkingDisplay) -> Self {
        Self {
            message_id,
            thinking: String::new(),
            answer: String::new(),
            display,
            state: ExchangeState::Created,
            events_applied: 0,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Folds one event into the buffers and returns the entry update.
    ///
    /// Error events annotate the entry but leave the session accumulating.
    pub fn apply(&mut self, event: &StreamEvent) -> MessagePatch {
        self.events_applied = self.events_applied.saturating_add(1);
        match event.kind {
            EventKind::Thinking => {
                self.thinking.push_str(&event.content);
                self.state = ExchangeState::Accumulating(DisplayState::Thinking);
                let patch = MessagePatch::default().thinking_content(self.thinking.clone());
                match self.display {
                    ThinkingDisplay::FlipToAnswer => patch.display_state(DisplayState::Answer),
                    ThinkingDisplay::HoldUntilAnswer if self.answer.is_empty() => patch
                        .content(self.thinking.clone())
                        .display_state(DisplayState::Thinking),
                    ThinkingDisplay::HoldUntilAnswer => patch,
                }
            }
            EventKind::Answer => {
                self.answer.push_str(&event.content);
                self.state = ExchangeState::Accumulating(DisplayState::Answer);
                MessagePatch::default()
                    .content(self.answer.clone())
                    .display_state(DisplayState::Answer)
            }
            EventKind::Error => {
                if self.state == ExchangeState::Created {
                    self.state = ExchangeState::Accumulating(DisplayState::Answer);
                }
                MessagePatch::default()
                    .content(annotate(&self.answer, &format!("[error: {}]", event.content)))
                    .display_state(DisplayState::Answer)
            }
        }
    }

    /// Ends the session after normal completion.
    ///
    /// Returns the final patch when the entry still needs one: a stream with
    /// reasoning but no answer falls back to showing the reasoning.
    pub fn complete(self) -> (ExchangeOutcome, Option<MessagePatch>) {
        if self.answer.is_empty() {
            let patch = MessagePatch::default()
                .content(self.thinking)
                .display_state(DisplayState::Thinking)
                .summary(NO_ANSWER_SUMMARY);
            (ExchangeOutcome::ThinkingOnly, Some(patch))
        } else {
            (ExchangeOutcome::Answered, None)
        }
    }

    /// Ends the session after a transport failure.
    pub fn fail(self, error: &TransportError) -> MessagePatch {
        MessagePatch::default()
            .content(network_error_annotation(&self.answer, error))
            .display_state(DisplayState::Answer)
    }
}

/// Answer text followed by a network error marker.
pub fn network_error_annotation(answer: &str, error: &TransportError) -> String {
    annotate(answer, &format!("[network error: {error}]"))
}

fn annotate(answer: &str, marker: &str) -> String {
    if answer.is_empty() {
        marker.to_string()
    } else {
        format!("{answer}\n{marker}")
    }
}
