use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::message::{ConversationMessage, MessageDraft, MessageId, MessagePatch};

const CHANGE_FEED_CAPACITY: usize = 256;
/// Random re-draws before falling back to a length-qualified id.
const MAX_ID_DRAWS: usize = 32;

/// Change notification published after every transcript mutation.
///
/// `Updated` carries the replacement value, never a diff.
#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptChange {
    Appended(ConversationMessage),
    Updated(ConversationMessage),
    Cleared,
}

struct TranscriptInner {
    messages: RwLock<Vec<ConversationMessage>>,
    changes: broadcast::Sender<TranscriptChange>,
}

/// Shared, ordered conversation history.
///
/// Cloning yields another handle to the same transcript. Entries are appended
/// in creation order and replaced in place by id; `clear` is the only removal.
#[derive(Clone)]
pub struct Transcript {
    inner: Arc<TranscriptInner>,
}

impl Transcript {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(TranscriptInner {
                messages: RwLock::new(Vec::new()),
                changes,
            }),
        }
    }

    /// Subscribes to the change feed.
    ///
    /// Changes are published while the write lock is held, so every
    /// subscriber observes them in mutation order. Slow subscribers may lag.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptChange> {
        self.inner.changes.subscribe()
    }

    /// Appends a new entry and returns its id.
    pub fn append(&self, draft: MessageDraft) -> MessageId {
        let now = Utc::now();
        let mut messages = self.write();
        let mut id = MessageId::generate(now);
        let mut draws = 1;
        while messages.iter().any(|m| m.id == id) {
            id = if draws < MAX_ID_DRAWS {
                MessageId::generate(now)
            } else {
                MessageId::new(format!("{}-{}", MessageId::generate(now), messages.len()))
            };
            draws += 1;
        }
        let message = draft.into_message(id.clone(), now);
        debug!(message_id = %id, role = ?message.role, "message appended");
        messages.push(message.clone());
        self.publish(TranscriptChange::Appended(message));
        id
    }

    /// Replaces the entry `id` with `patch` merged over it.
    ///
    /// Returns `false` (and logs) when no such entry exists, for example
    /// because the transcript was cleared while an exchange was running.
    pub fn update(&self, id: &MessageId, patch: &MessagePatch) -> bool {
        let mut messages = self.write();
        let Some(index) = messages.iter().position(|m| &m.id == id) else {
            warn!(message_id = %id, "update for unknown message ignored");
            return false;
        };
        let updated = patch.merged_into(&messages[index]);
        messages[index] = updated.clone();
        self.publish(TranscriptChange::Updated(updated));
        true
    }

    pub fn get(&self, id: &MessageId) -> Option<ConversationMessage> {
        self.read().iter().find(|m| &m.id == id).cloned()
    }

    /// Copy of all entries in order.
    pub fn snapshot(&self) -> Vec<ConversationMessage> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut messages = self.write();
        messages.clear();
        self.publish(TranscriptChange::Cleared);
    }

    fn publish(&self, change: TranscriptChange) {
        // No receivers is fine; nobody is watching.
        let _ = self.inner.changes.send(change);
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ConversationMessage>> {
        self.inner
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ConversationMessage>> {
        self.inner
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}
