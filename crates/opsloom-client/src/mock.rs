//! In-memory transport for tests.
//!
//! Serves scripted responses and records every call. Streams are either
//! pre-scripted chunk lists or channels fed by the test while a turn runs.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;

use opsloom_core::{AssistantId, MessageId, SessionId};

use crate::error::{ClientError, Result};
use crate::transport::{ByteStream, Transport};
use crate::types::{Assistant, Feedback, HistoryEntry, Message, SessionInfo};

/// A call received by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `create_session`.
    CreateSession(AssistantId),
    /// `submit_message`.
    SubmitMessage {
        /// Target session.
        session_id: SessionId,
        /// Submitted text.
        text: String,
    },
    /// `fetch_timeline`.
    FetchTimeline(SessionId),
    /// `fetch_history`.
    FetchHistory,
    /// `fetch_assistants`.
    FetchAssistants,
    /// `submit_feedback`.
    SubmitFeedback {
        /// Rated message.
        message_id: MessageId,
        /// Rating.
        feedback: Feedback,
    },
}

/// A transport that serves scripted responses from memory.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    assistants: Vec<Assistant>,
    history: Vec<HistoryEntry>,
    timelines: HashMap<SessionId, Vec<Message>>,
    sessions: VecDeque<Result<SessionId>>,
    streams: VecDeque<Result<ByteStream>>,
    timeline_errors: HashMap<SessionId, ClientError>,
    history_error: Option<ClientError>,
    assistants_error: Option<ClientError>,
    feedback_error: Option<ClientError>,
    calls: Vec<TransportCall>,
}

/// Feeds chunks into a stream served by [`MockTransport`].
///
/// Dropping the feeder ends the stream.
#[derive(Debug, Clone)]
pub struct StreamFeeder {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl StreamFeeder {
    /// Deliver a chunk. Returns `false` if the reader is gone.
    pub fn send(&self, chunk: &str) -> bool {
        self.tx
            .unbounded_send(Ok(Bytes::copy_from_slice(chunk.as_bytes())))
            .is_ok()
    }

    /// Deliver a read error.
    pub fn fail(&self, err: ClientError) -> bool {
        self.tx.unbounded_send(Err(err)).is_ok()
    }

    /// End the stream.
    pub fn close(&self) {
        self.tx.close_channel();
    }
}

impl MockTransport {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the given assistant catalogue.
    #[must_use]
    pub fn with_assistants(self, assistants: Vec<Assistant>) -> Self {
        self.state.lock().assistants = assistants;
        self
    }

    /// Serve the given history list.
    #[must_use]
    pub fn with_history(self, history: Vec<HistoryEntry>) -> Self {
        self.state.lock().history = history;
        self
    }

    /// Set the stored timeline of a session.
    pub fn set_timeline(&self, session_id: &SessionId, messages: Vec<Message>) {
        self.state
            .lock()
            .timelines
            .insert(session_id.clone(), messages);
    }

    /// Script the id returned by the next `create_session`.
    pub fn push_session(&self, session_id: &SessionId) {
        self.state.lock().sessions.push_back(Ok(session_id.clone()));
    }

    /// Make the next `create_session` fail.
    pub fn fail_create_session(&self, err: ClientError) {
        self.state.lock().sessions.push_back(Err(err));
    }

    /// Script the body of the next `submit_message` as a list of chunks.
    pub fn push_stream(&self, chunks: &[&str]) {
        let items: Vec<Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        self.state
            .lock()
            .streams
            .push_back(Ok(futures::stream::iter(items).boxed()));
    }

    /// Make the next `submit_message` handshake fail.
    pub fn fail_stream(&self, err: ClientError) {
        self.state.lock().streams.push_back(Err(err));
    }

    /// Serve the next `submit_message` from a channel the test feeds.
    #[must_use]
    pub fn push_channel_stream(&self) -> StreamFeeder {
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().streams.push_back(Ok(rx.boxed()));
        StreamFeeder { tx }
    }

    /// Make `fetch_timeline` fail for a session.
    pub fn fail_timeline(&self, session_id: &SessionId, err: ClientError) {
        self.state
            .lock()
            .timeline_errors
            .insert(session_id.clone(), err);
    }

    /// Make `fetch_history` fail until cleared with `None`.
    pub fn set_history_error(&self, err: Option<ClientError>) {
        self.state.lock().history_error = err;
    }

    /// Make `fetch_assistants` fail until cleared with `None`.
    pub fn set_assistants_error(&self, err: Option<ClientError>) {
        self.state.lock().assistants_error = err;
    }

    /// Make `submit_feedback` fail until cleared with `None`.
    pub fn set_feedback_error(&self, err: Option<ClientError>) {
        self.state.lock().feedback_error = err;
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    /// Number of received calls matching a predicate.
    #[must_use]
    pub fn count_calls(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

fn unscripted(what: &str) -> ClientError {
    ClientError::request(Some(500), Some(format!("mock: no scripted {what}")))
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_session(&self, assistant_id: &AssistantId) -> Result<SessionInfo> {
        let mut state = self.state.lock();
        state
            .calls
            .push(TransportCall::CreateSession(assistant_id.clone()));

        let id = state
            .sessions
            .pop_front()
            .unwrap_or_else(|| Err(unscripted("session")))?;

        // The service lists a new session right away, untitled.
        state.history.push(HistoryEntry {
            id: id.clone(),
            title: None,
            created_at: Utc::now(),
            assistant_id: assistant_id.clone(),
        });

        Ok(SessionInfo {
            id,
            assistant_id: Some(assistant_id.clone()),
        })
    }

    async fn submit_message(&self, session_id: &SessionId, text: &str) -> Result<ByteStream> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::SubmitMessage {
            session_id: session_id.clone(),
            text: text.to_string(),
        });
        state
            .streams
            .pop_front()
            .unwrap_or_else(|| Err(unscripted("stream")))
    }

    async fn fetch_timeline(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let mut state = self.state.lock();
        state
            .calls
            .push(TransportCall::FetchTimeline(session_id.clone()));

        if let Some(err) = state.timeline_errors.get(session_id) {
            return Err(err.clone());
        }
        Ok(state.timelines.get(session_id).cloned().unwrap_or_default())
    }

    async fn fetch_history(&self) -> Result<Vec<HistoryEntry>> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::FetchHistory);

        if let Some(err) = &state.history_error {
            return Err(err.clone());
        }
        Ok(state.history.clone())
    }

    async fn fetch_assistants(&self) -> Result<Vec<Assistant>> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::FetchAssistants);

        if let Some(err) = &state.assistants_error {
            return Err(err.clone());
        }
        Ok(state.assistants.clone())
    }

    async fn submit_feedback(&self, message_id: &MessageId, feedback: Feedback) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::SubmitFeedback {
            message_id: message_id.clone(),
            feedback,
        });

        match &state.feedback_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
