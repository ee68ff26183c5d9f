use std::sync::Arc;

use assistant_stream::{ChatBackend, StreamRequest};
use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::ConversationError;
use crate::message::MessageId;
use crate::session::{ExchangeOutcome, ExchangeState, StreamingSession};
use crate::transcript::Transcript;

/// Handle used to cancel a running exchange.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation.
    ///
    /// Once observed, the exchange applies no further transcript updates and
    /// drops its response stream. Cancelling a finished exchange does nothing.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A streamed exchange running in the background.
///
/// Dropping the handle does not cancel the exchange.
pub struct ExchangeHandle {
    message_id: MessageId,
    cancel: CancelHandle,
    state: watch::Receiver<ExchangeState>,
    task: JoinHandle<ExchangeOutcome>,
}

impl ExchangeHandle {
    /// Id of the assistant entry this exchange updates.
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExchangeState {
        self.state.borrow().clone()
    }

    /// Watches lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ExchangeState> {
        self.state.clone()
    }

    /// Waits for the exchange to end.
    ///
    /// Resolves only after every transcript update of the exchange was applied.
    pub async fn join(self) -> Result<ExchangeOutcome, ConversationError> {
        self.task
            .await
            .map_err(|e| ConversationError::Task(e.to_string()))
    }
}

/// Spawns the task driving one streamed exchange. Must run inside a tokio runtime.
pub(crate) fn spawn_exchange(
    backend: Arc<dyn ChatBackend>,
    transcript: Transcript,
    request: StreamRequest,
    session: StreamingSession,
) -> ExchangeHandle {
    let message_id = session.message_id().clone();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ExchangeState::Created);
    let task = tokio::spawn(drive_exchange(
        backend, transcript, request, session, cancel_rx, state_tx,
    ));
    ExchangeHandle {
        message_id,
        cancel: CancelHandle { tx: cancel_tx },
        state: state_rx,
        task,
    }
}

async fn drive_exchange(
    backend: Arc<dyn ChatBackend>,
    transcript: Transcript,
    request: StreamRequest,
    mut session: StreamingSession,
    mut cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ExchangeState>,
) -> ExchangeOutcome {
    let message_id = session.message_id().clone();
    let finish = |outcome: ExchangeOutcome| {
        let _ = state_tx.send(ExchangeState::Finished(outcome.clone()));
        outcome
    };

    let opened = tokio::select! {
        biased;
        () = cancelled(&mut cancel_rx) => {
            info!(message_id = %message_id, "exchange cancelled before the stream opened");
            return finish(ExchangeOutcome::Cancelled);
        }
        opened = backend.open_stream(&request) => opened,
    };
    let mut events = match opened {
        Ok(events) => events,
        Err(err) => {
            error!(message_id = %message_id, error = %err, "failed to open chat stream");
            transcript.update(&message_id, &session.fail(&err));
            return finish(ExchangeOutcome::Failed(err));
        }
    };

    loop {
        tokio::select! {
            biased;
            () = cancelled(&mut cancel_rx) => {
                info!(message_id = %message_id, events = session.events_applied(), "exchange cancelled");
                drop(events);
                return finish(ExchangeOutcome::Cancelled);
            }
            next = events.next() => match next {
                Some(Ok(event)) => {
                    debug!(message_id = %message_id, seq = session.events_applied(), kind = %event.kind, "stream event");
                    let patch = session.apply(&event);
                    transcript.update(&message_id, &patch);
                    state_tx.send_replace(session.state().clone());
                }
                Some(Err(err)) => {
                    error!(message_id = %message_id, error = %err, "chat stream failed");
                    transcript.update(&message_id, &session.fail(&err));
                    return finish(ExchangeOutcome::Failed(err));
                }
                None => {
                    let events_applied = session.events_applied();
                    let (outcome, patch) = session.complete();
                    if let Some(patch) = patch {
                        transcript.update(&message_id, &patch);
                    }
                    info!(message_id = %message_id, events = events_applied, outcome = ?outcome, "exchange completed");
                    return finish(outcome);
                }
            }
        }
    }
}

/// Resolves once cancellation is requested; never resolves if every sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
