//! Session controller.
//!
//! Owns the session lifecycle: loading the catalogue and history, opening a
//! stored session, creating a session on the first message, and keeping the
//! history list in sync with titles reported by the stream.

use std::sync::Arc;

use opsloom_client::{Feedback, HistoryEntry, Transport};
use opsloom_core::{AssistantId, MessageId, SessionId};

use crate::error::{ChatError, Result};
use crate::state::{ChatEvent, ChatState, ChatStore, DispatchState};

/// Result of resolving the session for a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredSession {
    /// Session the turn is sent to.
    pub id: SessionId,
    /// Whether the session was created for this turn.
    pub created: bool,
}

/// Result of a title backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleBackfill {
    /// The history entry now carries the title.
    Applied,
    /// No history entry matches the session.
    NotFound,
}

/// Drives session-level operations against a [`Transport`].
pub struct SessionController<T: ?Sized> {
    transport: Arc<T>,
    store: ChatStore,
}

impl<T: ?Sized> Clone for SessionController<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            store: self.store.clone(),
        }
    }
}

impl<T: Transport + ?Sized> SessionController<T> {
    /// Create a controller over a transport and a store.
    pub fn new(transport: Arc<T>, store: ChatStore) -> Self {
        Self { transport, store }
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Load the assistant catalogue, then the history list, then mark the
    /// store ready.
    ///
    /// # Errors
    ///
    /// Returns the first failing call; `ready` stays false.
    pub async fn init(&self) -> Result<()> {
        let assistants = self.transport.fetch_assistants().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to load assistants; is the session authenticated?");
            ChatError::from(e)
        })?;

        tracing::debug!(count = assistants.len(), "Loaded assistants");
        self.store
            .update(&[ChatEvent::AssistantsChanged], |s| s.assistants = assistants);

        self.refresh_history().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to load history");
        })?;

        self.store.update(&[ChatEvent::Ready], |s| s.ready = true);
        Ok(())
    }

    /// Choose the assistant used when the next session is created.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::UnknownAssistant` if the id is not in the catalogue.
    pub fn select_assistant(&self, assistant_id: &AssistantId) -> Result<()> {
        let known = self.store.update_with(|s, emit| {
            if s.assistant(assistant_id).is_none() {
                return false;
            }
            s.session.assistant_id = Some(assistant_id.clone());
            emit.push(ChatEvent::AssistantsChanged);
            true
        });

        if known {
            Ok(())
        } else {
            Err(ChatError::UnknownAssistant(assistant_id.clone()))
        }
    }

    /// Open a stored session.
    ///
    /// Stops any reading stream, clears the timeline, fetches the stored
    /// messages and adopts the session's assistant from its history entry.
    /// Without a history entry the assistant becomes unknown.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the timeline stays empty and loading is cleared.
    pub async fn open(&self, session_id: &SessionId) -> Result<()> {
        self.store.cancel_signal().raise();

        let generation = self.store.update(
            &[
                ChatEvent::TimelineChanged,
                ChatEvent::SessionChanged(Some(session_id.clone())),
                ChatEvent::PendingChanged,
            ],
            |s| {
                s.timeline.clear();
                s.session.id = Some(session_id.clone());
                s.pending.is_loading = true;
                s.pending.is_thinking = false;
                s.dispatch = DispatchState::Idle;
                s.timeline.generation()
            },
        );

        tracing::debug!(session_id = %session_id, "Opening session");
        let fetched = self.transport.fetch_timeline(session_id).await;

        let current = |s: &ChatState| s.timeline.generation() == generation;
        match fetched {
            Ok(messages) => {
                let applied = self.store.update_with(|s, emit| {
                    if !current(s) {
                        return false;
                    }
                    s.timeline.replace(messages);
                    let owner = s.history_entry(session_id).map(|e| e.assistant_id.clone());
                    if owner.is_none() {
                        tracing::warn!(session_id = %session_id, "Opened session not in history; assistant unknown");
                    }
                    if s.session.assistant_id != owner {
                        s.session.assistant_id = owner;
                        emit.push(ChatEvent::AssistantsChanged);
                    }
                    s.pending.is_loading = false;
                    emit.extend([ChatEvent::TimelineChanged, ChatEvent::PendingChanged]);
                    true
                });

                if !applied {
                    tracing::debug!(session_id = %session_id, "Superseded before timeline arrived");
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Failed to open session");
                self.store.update(&[ChatEvent::PendingChanged], |s| {
                    if current(s) {
                        s.pending.is_loading = false;
                    }
                });
                Err(e.into())
            }
        }
    }

    /// Return the active session id, creating a session if there is none.
    ///
    /// A created id is adopted only if the timeline was not replaced while the
    /// request was in flight.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::NoAssistant` if a session is needed and no
    /// assistant is selected, or the creation error.
    pub async fn ensure_session(&self) -> Result<EnsuredSession> {
        let (existing, assistant_id, generation) = self.store.read(|s| {
            (
                s.session.id.clone(),
                s.session.assistant_id.clone(),
                s.timeline.generation(),
            )
        });

        if let Some(id) = existing {
            return Ok(EnsuredSession { id, created: false });
        }

        let assistant_id = assistant_id.ok_or(ChatError::NoAssistant)?;
        let info = self.transport.create_session(&assistant_id).await?;

        let adopted = self.store.update_with(|s, emit| {
            if s.timeline.generation() != generation || s.session.id.is_some() {
                return false;
            }
            s.session.id = Some(info.id.clone());
            emit.push(ChatEvent::SessionChanged(Some(info.id.clone())));
            true
        });

        if adopted {
            tracing::debug!(session_id = %info.id, assistant_id = %assistant_id, "Adopted new session");
        }

        Ok(EnsuredSession {
            id: info.id,
            created: true,
        })
    }

    /// Replace the history list with the server's.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the list is left unchanged.
    pub async fn refresh_history(&self) -> Result<()> {
        let history = self.transport.fetch_history().await?;
        tracing::debug!(count = history.len(), "Refreshed history");
        self.store
            .update(&[ChatEvent::HistoryChanged], |s| s.history = history);
        Ok(())
    }

    /// Set the title of a history entry.
    pub fn backfill_title(&self, session_id: &SessionId, title: &str) -> TitleBackfill {
        let found = self.store.update_with(|s, emit| {
            let Some(entry) = s.history.iter_mut().find(|h| &h.id == session_id) else {
                return false;
            };
            entry.title = Some(title.to_string());
            emit.push(ChatEvent::HistoryChanged);
            true
        });

        if found {
            TitleBackfill::Applied
        } else {
            tracing::warn!(session_id = %session_id, "Cannot backfill title: session not in history");
            TitleBackfill::NotFound
        }
    }

    /// Detach from the current conversation.
    pub fn clear(&self) {
        self.store.cancel_signal().raise();
        self.store.update(
            &[
                ChatEvent::TimelineChanged,
                ChatEvent::SessionChanged(None),
                ChatEvent::PendingChanged,
            ],
            ChatState::clear_conversation,
        );
    }

    /// Restore the initial state, keeping only the `ready` flag.
    pub fn reset(&self) {
        self.store.cancel_signal().raise();
        self.store.update(
            &[
                ChatEvent::TimelineChanged,
                ChatEvent::SessionChanged(None),
                ChatEvent::HistoryChanged,
                ChatEvent::AssistantsChanged,
                ChatEvent::PendingChanged,
            ],
            |s| {
                let mut timeline = std::mem::take(&mut s.timeline);
                timeline.clear();
                *s = ChatState {
                    timeline,
                    ready: s.ready,
                    ..ChatState::default()
                };
            },
        );
    }

    /// Rate an assistant reply.
    ///
    /// # Errors
    ///
    /// Returns the transport error; nothing is written to the timeline.
    pub async fn submit_feedback(&self, message_id: &MessageId, feedback: Feedback) -> Result<()> {
        self.transport
            .submit_feedback(message_id, feedback)
            .await
            .inspect_err(|e| {
                tracing::warn!(message_id = %message_id, error = %e, "Failed to submit feedback");
            })?;
        Ok(())
    }

    /// History ordered by creation time, newest first.
    #[must_use]
    pub fn history_sorted(&self) -> Vec<HistoryEntry> {
        let mut history = self.store.history();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history
    }
}
