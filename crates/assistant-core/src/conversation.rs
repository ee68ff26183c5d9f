use std::sync::Arc;

use assistant_stream::{ChatBackend, ChatRequest, StreamRequest};
use tracing::{error, info};

use crate::errors::ConversationError;
use crate::exchange::{ExchangeHandle, spawn_exchange};
use crate::message::{Attachments, MessageDraft, MessageId, MessagePatch};
use crate::mode::ChatMode;
use crate::session::{ExchangeOutcome, StreamingSession, ThinkingDisplay};
use crate::transcript::Transcript;

/// Session id used by [`Conversation::send_message`] for streamed exchanges.
pub const DEFAULT_SESSION_ID: &str = "default";

pub const GREETING: &str =
    "Hello! I'm your assistant. Pick a mode and ask me anything, from everyday chat to database questions.";

const NO_CONTENT_FALLBACK: &str = "Received a message with no content";

/// Per-conversation exchange settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub thinking_display: ThinkingDisplay,
}

impl ExchangeOptions {
    pub fn with_thinking_display(mut self, display: ThinkingDisplay) -> Self {
        self.thinking_display = display;
        self
    }
}

/// Result of an exchange that ran to its end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeReport {
    /// The assistant entry written by the exchange.
    pub message_id: MessageId,
    pub outcome: ExchangeOutcome,
}

/// Drives exchanges against a backend and records them in a transcript.
///
/// Cheap to clone; clones share the transcript and the backend.
#[derive(Clone)]
pub struct Conversation {
    transcript: Transcript,
    backend: Arc<dyn ChatBackend>,
    options: ExchangeOptions,
}

impl Conversation {
    pub fn new(transcript: Transcript, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            transcript,
            backend,
            options: ExchangeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExchangeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn options(&self) -> ExchangeOptions {
        self.options
    }

    /// Starts a streamed exchange and returns immediately.
    ///
    /// Appends an empty assistant entry in the thinking state; all later
    /// changes to it come from the background task. The user message is not
    /// recorded here. Must be called inside a tokio runtime.
    pub fn begin_streamed_exchange(
        &self,
        user_text: &str,
        mode: ChatMode,
        session_id: &str,
    ) -> ExchangeHandle {
        let message_id = self.transcript.append(MessageDraft::assistant_placeholder());
        info!(message_id = %message_id, mode = %mode, session_id, "streamed exchange started");
        let session = StreamingSession::new(message_id, self.options.thinking_display);
        let request = StreamRequest::new(user_text, mode.as_str(), session_id);
        spawn_exchange(
            Arc::clone(&self.backend),
            self.transcript.clone(),
            request,
            session,
        )
    }

    /// Runs one request/response exchange.
    ///
    /// Appends the user message, then exactly one assistant entry: the reply,
    /// or an explanation that the server could not be reached.
    pub async fn complete_single_shot_exchange(
        &self,
        user_text: &str,
        mode: ChatMode,
    ) -> ExchangeReport {
        self.transcript.append(MessageDraft::user(user_text));
        info!(mode = %mode, "single-shot exchange started");
        let request = ChatRequest::new(user_text, mode.as_str());
        match self.backend.send_chat(&request).await {
            Ok(response) => {
                let content = response.display_text().unwrap_or(NO_CONTENT_FALLBACK);
                let draft = MessageDraft::assistant(content)
                    .with_attachments(Attachments::from_response(&response));
                let message_id = self.transcript.append(draft);
                info!(message_id = %message_id, "single-shot exchange completed");
                ExchangeReport {
                    message_id,
                    outcome: ExchangeOutcome::Answered,
                }
            }
            Err(err) => {
                error!(error = %err, "single-shot exchange failed");
                let message_id = self.transcript.append(MessageDraft::assistant(format!(
                    "Could not reach the server; make sure the backend service is running. Error: {err}"
                )));
                ExchangeReport {
                    message_id,
                    outcome: ExchangeOutcome::Failed(err),
                }
            }
        }
    }

    /// Merges `patch` into entry `id`. Unknown ids are a logged no-op.
    pub fn update_message(&self, id: &MessageId, patch: &MessagePatch) -> bool {
        self.transcript.update(id, patch)
    }

    /// Sends one user message and waits for the exchange to end.
    ///
    /// Blank input is ignored (`Ok(None)`). Streamed modes use
    /// [`DEFAULT_SESSION_ID`]; the rest go through the single-shot path.
    pub async fn send_message(
        &self,
        text: &str,
        mode: ChatMode,
    ) -> Result<Option<ExchangeReport>, ConversationError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if !mode.is_streamed() {
            return Ok(Some(self.complete_single_shot_exchange(text, mode).await));
        }
        self.transcript.append(MessageDraft::user(text));
        let handle = self.begin_streamed_exchange(text, mode, DEFAULT_SESSION_ID);
        let message_id = handle.message_id().clone();
        let outcome = handle.join().await?;
        Ok(Some(ExchangeReport {
            message_id,
            outcome,
        }))
    }

    pub async fn check_health(&self) -> bool {
        self.backend.health().await
    }

    /// Appends the assistant greeting.
    pub fn greet(&self) -> MessageId {
        self.transcript.append(MessageDraft::assistant(GREETING))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use assistant_stream::{ChatResponse, EventStream, StreamEvent, TransportError};
    use async_trait::async_trait;
    use tokio::sync::{broadcast, mpsc};

    use super::*;
    use crate::message::{ConversationMessage, DisplayState, Role};
    use crate::session::NO_ANSWER_SUMMARY;
    use crate::transcript::TranscriptChange;

    type Item = Result<StreamEvent, TransportError>;

    enum Script {
        Stream(EventStream),
        OpenFails(TransportError),
    }

    #[derive(Default)]
    struct FakeBackend {
        streams: Mutex<VecDeque<Script>>,
        chat: Mutex<VecDeque<Result<ChatResponse, TransportError>>>,
        stream_requests: Mutex<Vec<StreamRequest>>,
        chat_requests: Mutex<Vec<ChatRequest>>,
        healthy: bool,
    }

    impl FakeBackend {
        fn with_stream(self, items: Vec<Item>) -> Self {
            self.with_script(Script::Stream(Box::pin(futures::stream::iter(items))))
        }

        fn with_channel(self) -> (Self, mpsc::UnboundedSender<Item>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            (self.with_script(Script::Stream(Box::pin(stream))), tx)
        }

        fn with_script(self, script: Script) -> Self {
            self.streams.lock().unwrap().push_back(script);
            self
        }

        fn with_chat(self, reply: Result<ChatResponse, TransportError>) -> Self {
            self.chat.lock().unwrap().push_back(reply);
            self
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn open_stream(&self, request: &StreamRequest) -> Result<EventStream, TransportError> {
            self.stream_requests.lock().unwrap().push(request.clone());
            match self.streams.lock().unwrap().pop_front() {
                Some(Script::Stream(stream)) => Ok(stream),
                Some(Script::OpenFails(err)) => Err(err),
                None => Err(TransportError::Request("no scripted stream".into())),
            }
        }

        async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
            self.chat_requests.lock().unwrap().push(request.clone());
            self.chat
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Request("no scripted reply".into())))
        }

        async fn health(&self) -> bool {
            self.healthy
        }
    }

    fn setup(backend: FakeBackend) -> (Conversation, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let conversation = Conversation::new(Transcript::new(), backend.clone());
        (conversation, backend)
    }

    async fn next_update(feed: &mut broadcast::Receiver<TranscriptChange>) -> ConversationMessage {
        loop {
            match feed.recv().await.expect("change feed closed") {
                TranscriptChange::Updated(message) => return message,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn streamed_exchange_accumulates_thinking_and_answer() {
        let (conversation, backend) = setup(FakeBackend::default().with_stream(vec![
            Ok(StreamEvent::thinking("A")),
            Ok(StreamEvent::thinking("B")),
            Ok(StreamEvent::answer("C")),
            Ok(StreamEvent::answer("D")),
        ]));
        let handle = conversation.begin_streamed_exchange("why?", ChatMode::Focus, "s-1");
        let id = handle.message_id().clone();
        let placeholder = conversation.transcript().get(&id).expect("placeholder");
        assert_eq!(placeholder.role, Role::Assistant);

        let outcome = handle.join().await.expect("join");
        assert_eq!(outcome, ExchangeOutcome::Answered);

        let message = conversation.transcript().get(&id).expect("message");
        assert_eq!(message.thinking_content.as_deref(), Some("AB"));
        assert_eq!(message.content, "CD");
        assert_eq!(message.display_state, DisplayState::Answer);
        assert_eq!(message.summary, None);

        let requests = backend.stream_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "why?");
        assert_eq!(requests[0].mode, "focus");
        assert_eq!(requests[0].session_id, "s-1");
    }

    #[tokio::test]
    async fn thinking_only_stream_shows_reasoning_with_summary() {
        let (conversation, _) = setup(FakeBackend::default().with_stream(vec![
            Ok(StreamEvent::thinking("A")),
            Ok(StreamEvent::thinking("B")),
        ]));
        let handle = conversation.begin_streamed_exchange("q", ChatMode::Focus, "s");
        let id = handle.message_id().clone();
        assert_eq!(handle.join().await.expect("join"), ExchangeOutcome::ThinkingOnly);

        let message = conversation.transcript().get(&id).expect("message");
        assert_eq!(message.content, "AB");
        assert_eq!(message.display_state, DisplayState::Thinking);
        assert_eq!(message.summary.as_deref(), Some(NO_ANSWER_SUMMARY));
    }

    #[tokio::test]
    async fn error_events_annotate_and_the_stream_continues() {
        let (conversation, _) = setup(FakeBackend::default().with_stream(vec![
            Ok(StreamEvent::answer("partial")),
            Ok(StreamEvent::error("tool timed out")),
            Ok(StreamEvent::answer(" rest")),
        ]));
        let mut feed = conversation.transcript().subscribe();
        let handle = conversation.begin_streamed_exchange("q", ChatMode::Focus, "s");
        assert_eq!(handle.join().await.expect("join"), ExchangeOutcome::Answered);

        next_update(&mut feed).await;
        let annotated = next_update(&mut feed).await;
        assert_eq!(annotated.content, "partial\n[error: tool timed out]");
        let last = next_update(&mut feed).await;
        assert_eq!(last.content, "partial rest");
    }

    #[tokio::test]
    async fn transport_failure_keeps_partial_answer_and_stops_updates() {
        let (conversation, _) = setup(FakeBackend::default().with_stream(vec![
            Ok(StreamEvent::answer("partial")),
            Err(TransportError::Read("connection reset".into())),
            Ok(StreamEvent::answer("never applied")),
        ]));
        let mut feed = conversation.transcript().subscribe();
        let handle = conversation.begin_streamed_exchange("q", ChatMode::Focus, "s");
        let id = handle.message_id().clone();
        let outcome = handle.join().await.expect("join");
        assert_eq!(
            outcome,
            ExchangeOutcome::Failed(TransportError::Read("connection reset".into()))
        );

        let message = conversation.transcript().get(&id).expect("message");
        assert!(message.content.starts_with("partial"));
        assert!(message.content.ends_with("[network error: stream read failed: connection reset]"));

        let mut updates = 0;
        while let Ok(change) = feed.try_recv() {
            if matches!(change, TranscriptChange::Updated(_)) {
                updates += 1;
            }
        }
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn open_failure_annotates_the_placeholder() {
        let (conversation, _) = setup(FakeBackend::default().with_script(
            Script::OpenFails(TransportError::Status {
                status: 502,
                body: "bad gateway".into(),
            }),
        ));
        let handle = conversation.begin_streamed_exchange("q", ChatMode::Focus, "s");
        let id = handle.message_id().clone();
        let outcome = handle.join().await.expect("join");
        assert!(matches!(outcome, ExchangeOutcome::Failed(TransportError::Status { status: 502, .. })));

        let message = conversation.transcript().get(&id).expect("message");
        assert_eq!(message.content, "[network error: HTTP error! status: 502]");
        assert_eq!(message.display_state, DisplayState::Answer);
    }

    #[tokio::test]
    async fn interleaved_exchanges_update_distinct_entries() {
        let (backend, first_tx) = FakeBackend::default().with_channel();
        let (backend, second_tx) = backend.with_channel();
        let (conversation, _) = setup(backend);
        let mut feed = conversation.transcript().subscribe();

        let first = conversation.begin_streamed_exchange("one", ChatMode::Focus, "a");
        let second = conversation.begin_streamed_exchange("two", ChatMode::Focus, "b");
        assert_ne!(first.message_id(), second.message_id());

        for (tx, content) in [
            (&first_tx, "1"),
            (&second_tx, "x"),
            (&first_tx, "2"),
            (&second_tx, "y"),
        ] {
            tx.send(Ok(StreamEvent::answer(content))).expect("send");
            next_update(&mut feed).await;
        }
        drop(first_tx);
        drop(second_tx);

        let first_id = first.message_id().clone();
        let second_id = second.message_id().clone();
        assert_eq!(first.join().await.expect("join"), ExchangeOutcome::Answered);
        assert_eq!(second.join().await.expect("join"), ExchangeOutcome::Answered);

        let transcript = conversation.transcript();
        assert_eq!(transcript.get(&first_id).expect("first").content, "12");
        assert_eq!(transcript.get(&second_id).expect("second").content, "xy");
    }

    #[tokio::test]
    async fn cancellation_stops_updates_and_drops_the_stream() {
        let (backend, tx) = FakeBackend::default().with_channel();
        let (conversation, _) = setup(backend);
        let mut feed = conversation.transcript().subscribe();

        let handle = conversation.begin_streamed_exchange("q", ChatMode::Focus, "s");
        let id = handle.message_id().clone();
        tx.send(Ok(StreamEvent::answer("before"))).expect("send");
        next_update(&mut feed).await;

        let cancel = handle.cancel_handle();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        assert_eq!(handle.join().await.expect("join"), ExchangeOutcome::Cancelled);

        assert!(tx.send(Ok(StreamEvent::answer("after"))).is_err());
        assert_eq!(conversation.transcript().get(&id).expect("message").content, "before");
    }

    #[tokio::test]
    async fn hold_until_answer_keeps_the_thinking_state_visible() {
        let (backend, tx) = FakeBackend::default().with_channel();
        let (conversation, _) = setup(backend);
        let conversation = conversation.with_options(
            ExchangeOptions::default().with_thinking_display(ThinkingDisplay::HoldUntilAnswer),
        );
        let mut feed = conversation.transcript().subscribe();

        let handle = conversation.begin_streamed_exchange("q", ChatMode::Focus, "s");
        tx.send(Ok(StreamEvent::thinking("pondering"))).expect("send");
        let message = next_update(&mut feed).await;
        assert_eq!(message.display_state, DisplayState::Thinking);
        assert_eq!(message.content, "pondering");

        tx.send(Ok(StreamEvent::answer("42"))).expect("send");
        let message = next_update(&mut feed).await;
        assert_eq!(message.display_state, DisplayState::Answer);
        assert_eq!(message.content, "42");
        drop(tx);
        assert_eq!(handle.join().await.expect("join"), ExchangeOutcome::Answered);
    }

    #[tokio::test]
    async fn single_shot_appends_user_and_reply_with_attachments() {
        let reply = ChatResponse {
            html: Some("<b>3 students</b>".into()),
            text: Some("3 students".into()),
            sql: Some("SELECT * FROM students".into()),
            ..Default::default()
        };
        let (conversation, backend) =
            setup(FakeBackend::default().with_chat(Ok(reply)));
        let report = conversation
            .complete_single_shot_exchange("list students", ChatMode::Text2Sql)
            .await;
        assert_eq!(report.outcome, ExchangeOutcome::Answered);

        let messages = conversation.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "list students");
        assert_eq!(messages[1].id, report.message_id);
        assert_eq!(messages[1].content, "<b>3 students</b>");
        let attachments = messages[1].attachments.as_ref().expect("attachments");
        assert_eq!(attachments.sql.as_deref(), Some("SELECT * FROM students"));

        let requests = backend.chat_requests.lock().unwrap();
        assert_eq!(requests[0].mode, "text2sql");
    }

    #[tokio::test]
    async fn single_shot_without_content_uses_fallback_text() {
        let (conversation, _) =
            setup(FakeBackend::default().with_chat(Ok(ChatResponse::default())));
        let report = conversation
            .complete_single_shot_exchange("hi", ChatMode::Chat)
            .await;
        let message = conversation.transcript().get(&report.message_id).expect("reply");
        assert_eq!(message.content, NO_CONTENT_FALLBACK);
        assert_eq!(message.attachments, None);
    }

    #[tokio::test]
    async fn single_shot_failure_appends_explanation() {
        let (conversation, _) = setup(
            FakeBackend::default().with_chat(Err(TransportError::Request("connection refused".into()))),
        );
        let report = conversation
            .complete_single_shot_exchange("hi", ChatMode::Chat)
            .await;
        assert!(matches!(report.outcome, ExchangeOutcome::Failed(_)));
        let messages = conversation.transcript().snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.starts_with("Could not reach the server"));
        assert!(messages[1].content.contains("connection refused"));
    }

    #[tokio::test]
    async fn send_message_routes_by_mode_and_ignores_blank_input() {
        let (conversation, backend) = setup(
            FakeBackend::default()
                .with_stream(vec![Ok(StreamEvent::answer("deep"))])
                .with_chat(Ok(ChatResponse {
                    text: Some("shallow".into()),
                    ..Default::default()
                })),
        );
        assert_eq!(conversation.send_message("   ", ChatMode::Focus).await, Ok(None));
        assert!(conversation.transcript().is_empty());

        let streamed = conversation
            .send_message(" think hard ", ChatMode::Focus)
            .await
            .expect("send")
            .expect("report");
        assert_eq!(streamed.outcome, ExchangeOutcome::Answered);
        let single = conversation
            .send_message("hello", ChatMode::Chat)
            .await
            .expect("send")
            .expect("report");
        assert_eq!(single.outcome, ExchangeOutcome::Answered);

        let contents: Vec<_> = conversation
            .transcript()
            .snapshot()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();
        assert_eq!(
            contents,
            vec![
                (Role::User, "think hard".to_string()),
                (Role::Assistant, "deep".to_string()),
                (Role::User, "hello".to_string()),
                (Role::Assistant, "shallow".to_string()),
            ]
        );
        assert_eq!(
            backend.stream_requests.lock().unwrap()[0].session_id,
            DEFAULT_SESSION_ID
        );
    }

    #[tokio::test]
    async fn update_message_on_unknown_id_is_a_noop() {
        let (conversation, _) = setup(FakeBackend::default());
        conversation.greet();
        let before = conversation.transcript().snapshot();
        assert!(!conversation.update_message(
            &MessageId::new("missing"),
            &MessagePatch::default().content("x")
        ));
        assert_eq!(conversation.transcript().snapshot(), before);
        assert_eq!(before[0].content, GREETING);
    }

    #[tokio::test]
    async fn health_reflects_the_backend() {
        let (conversation, _) = setup(FakeBackend {
            healthy: true,
            ..Default::default()
        });
        assert!(conversation.check_health().await);
        let (conversation, _) = setup(FakeBackend::default());
        assert!(!conversation.check_health().await);
    }
}
