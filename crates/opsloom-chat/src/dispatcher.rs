//! Message dispatcher.
//!
//! The queue/submit state machine:
//!
//! ```text
//! Idle ──enqueue──▶ Queued ──dispatch──▶ Sending ──stream open──▶ Streaming
//!  ▲                                        │                        │
//!  └──────────── error / end / cancel ◀─────┴────────────────────────┘
//! ```
//!
//! A turn appends the user message and an empty placeholder, resolves the
//! session, then applies each stream record to the placeholder in place. The
//! placeholder is addressed through a [`TurnHandle`]; once the timeline is
//! replaced (open, clear, reset) the turn is abandoned and writes nothing.

use futures::StreamExt;

use opsloom_client::{Message, RecordStream, StreamRecord, Transport};
use opsloom_core::SessionId;

use crate::error::{ChatError, Result};
use crate::session::{EnsuredSession, SessionController};
use crate::state::{ChatEvent, ChatStore, DispatchState, TurnHandle};

/// How a dispatched turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream ended normally.
    Completed,
    /// Cancellation was observed, or the turn was superseded.
    Cancelled,
    /// The turn failed; carries the text written to the timeline.
    Failed(String),
    /// Nothing was dispatched: no message was queued or the input was blank.
    Skipped,
}

enum TurnEnd {
    Completed,
    Cancelled,
    Abandoned,
}

/// Submits queued messages and applies streamed replies.
pub struct Dispatcher<T: ?Sized> {
    session: SessionController<T>,
}

impl<T: ?Sized> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<T: Transport + ?Sized> Dispatcher<T> {
    /// Create a dispatcher driving the given session controller.
    pub fn new(session: SessionController<T>) -> Self {
        Self { session }
    }

    /// The session controller.
    #[must_use]
    pub fn session(&self) -> &SessionController<T> {
        &self.session
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &ChatStore {
        self.session.store()
    }

    /// Queue a message for dispatch.
    ///
    /// Returns `false`, changing nothing, if the text is blank or a message is
    /// already queued or in flight.
    pub fn enqueue(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let queued = self.store().update_with(|s, emit| {
            if s.pending.is_loading || s.pending.queued {
                return false;
            }
            s.input = text.to_string();
            s.pending.queued = true;
            s.dispatch = DispatchState::Queued;
            emit.push(ChatEvent::PendingChanged);
            true
        });

        if !queued {
            tracing::debug!("Send already in flight; ignoring message");
        }
        queued
    }

    /// Queue and dispatch a message.
    pub async fn send(&self, text: &str) -> TurnOutcome {
        if !self.enqueue(text) {
            return TurnOutcome::Skipped;
        }
        self.dispatch().await
    }

    /// Dispatch the queued message, if there is one.
    pub async fn run_queued(&self) -> TurnOutcome {
        if self.store().pending().queued {
            self.dispatch().await
        } else {
            TurnOutcome::Skipped
        }
    }

    /// Ask the active stream to stop at its next chunk boundary.
    pub fn cancel(&self) {
        self.store().cancel_signal().raise();
    }

    /// Follow a navigation to another conversation.
    ///
    /// Skipped while a message is queued. Opening the active session again is
    /// a no-op; `None` detaches from the conversation.
    ///
    /// # Errors
    ///
    /// Returns the error of opening the target session.
    pub async fn navigate(&self, target: Option<&SessionId>) -> Result<()> {
        let (queued, active) = self
            .store()
            .read(|s| (s.pending.queued, s.session.id.clone()));

        if queued {
            tracing::debug!("Message queued; ignoring navigation");
            return Ok(());
        }

        match target {
            None => {
                self.session.clear();
                Ok(())
            }
            Some(id) if active.as_ref() == Some(id) => Ok(()),
            Some(id) => self.session.open(id).await,
        }
    }

    /// Run the queued turn to completion.
    pub async fn dispatch(&self) -> TurnOutcome {
        let Some((text, handle)) = self.start_turn() else {
            return TurnOutcome::Skipped;
        };

        match self.run_turn(&text, handle).await {
            Ok(TurnEnd::Completed) => TurnOutcome::Completed,
            Ok(TurnEnd::Cancelled | TurnEnd::Abandoned) => TurnOutcome::Cancelled,
            Err(err) => match self.fail_turn(handle, &err) {
                Some(message) => TurnOutcome::Failed(message),
                None => TurnOutcome::Cancelled,
            },
        }
    }

    /// Take the queued input and append the user message and placeholder.
    fn start_turn(&self) -> Option<(String, TurnHandle)> {
        let cancel = self.store().cancel_signal();
        self.store().update_with(|s, emit| {
            if !s.pending.queued {
                return None;
            }
            s.pending.queued = false;
            emit.push(ChatEvent::PendingChanged);

            let text = std::mem::take(&mut s.input);
            if text.trim().is_empty() {
                s.dispatch = DispatchState::Idle;
                return None;
            }

            s.timeline.push(Message::user(text.clone()));
            let handle = s.timeline.push(Message::placeholder());
            s.pending.is_loading = true;
            s.pending.is_thinking = false;
            s.dispatch = DispatchState::Sending;
            cancel.reset();
            emit.push(ChatEvent::TimelineChanged);
            Some((text, handle))
        })
    }

    fn is_current(&self, handle: TurnHandle) -> bool {
        self.store().read(|s| s.timeline.is_current(handle))
    }

    async fn run_turn(&self, text: &str, handle: TurnHandle) -> Result<TurnEnd> {
        let EnsuredSession { id, created } = self.session.ensure_session().await?;
        if !self.is_current(handle) {
            return Ok(TurnEnd::Abandoned);
        }

        let body = self.session.transport().submit_message(&id, text).await?;

        let streaming = self.store().update_with(|s, emit| {
            if !s.timeline.is_current(handle) {
                return false;
            }
            s.dispatch = DispatchState::Streaming;
            s.pending.is_thinking = true;
            emit.push(ChatEvent::PendingChanged);
            true
        });
        if !streaming {
            return Ok(TurnEnd::Abandoned);
        }
        tracing::debug!(session_id = %id, "Streaming reply");

        let mut records = RecordStream::new(body, self.store().cancel_signal().clone());
        let mut title_applied = false;

        while let Some(record) = records.next().await {
            let StreamRecord {
                blocks,
                message_id,
                title,
                sources,
            } = record?;

            let applied = self.store().update_with(|s, emit| {
                let Some(message) = s.timeline.get_mut(handle) else {
                    return false;
                };
                // A title-only record carries no content.
                if let Some(blocks) = blocks {
                    message.blocks = blocks;
                    message.id = message_id;
                    message.sources = sources;
                    s.pending.is_thinking = false;
                    emit.push(ChatEvent::TimelineChanged);
                }
                true
            });

            if !applied {
                tracing::debug!(session_id = %id, "Turn superseded; dropping stream");
                return Ok(TurnEnd::Abandoned);
            }

            if let Some(title) = title.filter(|_| !title_applied) {
                self.session.backfill_title(&id, &title);
                title_applied = true;
            }
        }

        let cancelled = records.is_cancelled();
        let cancel = self.store().cancel_signal();
        // A superseded turn leaves the signal to the turn that replaced it.
        let finished = self.store().update_with(|s, emit| {
            if !s.timeline.is_current(handle) {
                return false;
            }
            s.pending.is_loading = false;
            s.pending.is_thinking = false;
            s.dispatch = DispatchState::Idle;
            cancel.reset();
            emit.push(ChatEvent::PendingChanged);
            true
        });

        if !finished {
            return Ok(TurnEnd::Abandoned);
        }

        if cancelled {
            tracing::debug!(session_id = %id, "Reply cancelled");
            return Ok(TurnEnd::Cancelled);
        }

        if created {
            if let Err(e) = self.session.refresh_history().await {
                tracing::warn!(error = %e, "Failed to refresh history after new session");
            }
        }
        Ok(TurnEnd::Completed)
    }

    /// Write the error message for a failed turn. Returns `None` if the turn
    /// was superseded.
    fn fail_turn(&self, handle: TurnHandle, err: &ChatError) -> Option<String> {
        tracing::error!(error = %err, "Turn failed");
        let text = err.user_message();

        self.store().update_with(|s, emit| {
            let placeholder = s.timeline.get(handle).map(Message::is_placeholder)?;
            let error = Message::assistant_error(text.clone());
            if placeholder {
                if let Some(message) = s.timeline.get_mut(handle) {
                    *message = error;
                }
            } else {
                s.timeline.push(error);
            }
            s.pending.is_loading = false;
            s.pending.is_thinking = false;
            s.dispatch = DispatchState::Idle;
            emit.extend([ChatEvent::TimelineChanged, ChatEvent::PendingChanged]);
            Some(text)
        })
    }
}
