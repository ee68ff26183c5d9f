/// Errors surfaced by the conversation API.
///
/// Transport problems never show up here: they become transcript annotations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    /// The exchange task panicked or was aborted by the runtime.
    #[error("exchange task failed: {0}")]
    Task(String),
    /// A mode name that is not one of the known chat modes.
    #[error("unknown chat mode: {0}")]
    UnknownMode(String),
}
