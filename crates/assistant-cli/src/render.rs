//! Incremental terminal rendering of transcript changes.

use std::collections::HashMap;
use std::io::Write as _;

use assistant_core::{ConversationMessage, MessageId, Role, TranscriptChange};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Thinking,
    Content,
}

#[derive(Default)]
struct Shown {
    thinking: String,
    content: String,
    summary: bool,
    section: Option<Section>,
}

/// Turns transcript changes into append-only terminal output.
///
/// Only assistant entries are printed; the user already sees what they typed.
#[derive(Default)]
pub struct Renderer {
    shown: HashMap<MessageId, Shown>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for one change.
    pub fn render(&mut self, change: &TranscriptChange) -> String {
        match change {
            TranscriptChange::Appended(message) if message.role == Role::Assistant => {
                let mut out = String::from("\nassistant> ");
                let shown = self.shown.entry(message.id.clone()).or_default();
                render_delta(shown, message, &mut out);
                out
            }
            TranscriptChange::Appended(_) => String::new(),
            TranscriptChange::Updated(message) => match self.shown.get_mut(&message.id) {
                Some(shown) => {
                    let mut out = String::new();
                    render_delta(shown, message, &mut out);
                    out
                }
                None => String::new(),
            },
            TranscriptChange::Cleared => {
                self.shown.clear();
                "\n(conversation cleared)\n".to_string()
            }
        }
    }

    /// Renders `change` to stdout.
    pub fn print(&mut self, change: &TranscriptChange) {
        let out = self.render(change);
        if out.is_empty() {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(out.as_bytes());
        let _ = stdout.flush();
    }

    /// Handles a feed receive result; lagging only loses intermediate states.
    pub fn print_received(&mut self, received: Result<TranscriptChange, broadcast::error::RecvError>) {
        match received {
            Ok(change) => self.print(&change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "renderer fell behind the transcript feed");
            }
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }

    /// Prints every change already queued on `feed`.
    pub fn drain(&mut self, feed: &mut broadcast::Receiver<TranscriptChange>) {
        loop {
            match feed.try_recv() {
                Ok(change) => self.print(&change),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "renderer fell behind the transcript feed");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

fn render_delta(shown: &mut Shown, message: &ConversationMessage, out: &mut String) {
    if let Some(thinking) = &message.thinking_content
        && thinking.len() > shown.thinking.len()
    {
        if shown.section != Some(Section::Thinking) {
            out.push_str(if shown.section.is_some() { "\n💭 " } else { "💭 " });
            shown.section = Some(Section::Thinking);
        }
        match thinking.strip_prefix(shown.thinking.as_str()) {
            Some(delta) => out.push_str(delta),
            None => out.push_str(thinking),
        }
        shown.thinking.clone_from(thinking);
    }

    if message.content != shown.content && !message.content.is_empty() {
        // Content mirroring the thinking text was already printed as thinking.
        let mirrors_thinking = message.thinking_content.as_deref() == Some(message.content.as_str())
            && shown.content.is_empty()
            && message.summary.is_none();
        if !mirrors_thinking {
            match message.content.strip_prefix(shown.content.as_str()) {
                Some(delta) if shown.section == Some(Section::Content) || shown.section.is_none() => {
                    out.push_str(delta);
                }
                _ => {
                    out.push('\n');
                    out.push_str(&message.content);
                }
            }
            shown.section = Some(Section::Content);
            shown.content.clone_from(&message.content);
        }
    }

    if let Some(summary) = &message.summary
        && !shown.summary
    {
        out.push_str("\n(");
        out.push_str(summary);
        out.push(')');
        shown.summary = true;
    }
}
