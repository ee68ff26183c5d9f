//! Conversation state for the assistant client.
//!
//! A [`Transcript`] holds the ordered history and publishes every change.
//! A [`Conversation`] runs exchanges against a
//! [`ChatBackend`](assistant_stream::ChatBackend): streamed exchanges fold
//! `thinking`/`answer`/`error` events into a single assistant entry through
//! a [`StreamingSession`], single-shot exchanges append one reply.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use assistant_core::{ChatMode, Conversation, Transcript};
//! use assistant_stream::HttpBackend;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(HttpBackend::from_env()?);
//! let conversation = Conversation::new(Transcript::new(), backend);
//! let handle = conversation.begin_streamed_exchange("why is the sky blue?", ChatMode::Focus, "default");
//! let outcome = handle.join().await?;
//! println!("{outcome:?}: {:?}", conversation.transcript().snapshot().last());
//! # Ok(())
//! # }
//! ```

pub mod conversation;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod mode;
pub mod observability;
pub mod session;
pub mod transcript;

pub use conversation::{Conversation, DEFAULT_SESSION_ID, ExchangeOptions, ExchangeReport, GREETING};
pub use errors::ConversationError;
pub use exchange::{CancelHandle, ExchangeHandle};
pub use message::{
    Attachments, ConversationMessage, DisplayState, MessageDraft, MessageId, MessagePatch, Role,
};
pub use mode::ChatMode;
pub use observability::init_observability;
pub use session::{
    ExchangeOutcome, ExchangeState, NO_ANSWER_SUMMARY, StreamingSession, ThinkingDisplay,
    network_error_annotation,
};
pub use transcript::{Transcript, TranscriptChange};
