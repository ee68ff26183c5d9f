//! Client side of the assistant chat protocol.
//!
//! Streamed exchanges are `POST /chat/stream` requests whose body is a
//! sequence of `data: <json>` lines terminated by `data: [DONE]`. This crate
//! turns such a body into a lazy stream of typed [`StreamEvent`]s and wraps
//! the single-shot and health endpoints behind the [`ChatBackend`] trait.
//!
//! ```no_run
//! use assistant_stream::{BackendConfig, ChatBackend, HttpBackend, StreamRequest};
//! use futures::StreamExt as _;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::new(BackendConfig::default())?;
//! let mut events = backend
//!     .open_stream(&StreamRequest::new("why is the sky blue?", "focus", "default"))
//!     .await?;
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{}: {}", event.kind, event.content);
//! }
//! # Ok(())
//! # }
//! ```

/// HTTP backend and the transport trait.
pub mod client;
/// Backend endpoint configuration.
pub mod config;
/// Line reassembly and event decoding.
pub mod decoder;
/// Error types.
pub mod errors;
/// Wire types.
pub mod protocol;

pub use client::{ChatBackend, HttpBackend};
pub use config::{BackendConfig, DEFAULT_BASE_URL};
pub use decoder::{
    ByteStream, DATA_PREFIX, DONE_SENTINEL, Decoded, EventStream, LineDecoder, LineOutcome,
    RawEvent, decode_event_stream, parse_line,
};
pub use errors::{ClientError, TransportError};
pub use protocol::{ChatRequest, ChatResponse, EventKind, StreamEvent, StreamRequest};
