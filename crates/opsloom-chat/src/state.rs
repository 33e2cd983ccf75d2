//! Conversation state and the shared store.
//!
//! All mutable conversation state lives in one [`ChatState`] behind a
//! [`ChatStore`]. Mutations go through short synchronous closures; the lock is
//! never held across an `.await`. Observers subscribe to [`ChatEvent`]s.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use opsloom_client::{Assistant, HistoryEntry, Message};
use opsloom_core::{AssistantId, CancelSignal, SessionId};

/// Capacity of the event channel; slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Timeline
// =============================================================================

/// Addresses the in-progress assistant message of one turn.
///
/// Invalidated when the timeline is replaced wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnHandle {
    generation: u64,
    index: usize,
}

impl TurnHandle {
    /// Index of the addressed message.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Ordered message timeline.
///
/// Append-only, except for in-place replacement of the in-progress assistant
/// message and wholesale replacement, which bumps the generation.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    generation: u64,
}

impl Timeline {
    /// The messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the timeline is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace every message, invalidating outstanding handles.
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.generation += 1;
    }

    /// Drop every message, invalidating outstanding handles.
    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    /// Append a message and return a handle to it.
    pub fn push(&mut self, message: Message) -> TurnHandle {
        self.messages.push(message);
        TurnHandle {
            generation: self.generation,
            index: self.messages.len() - 1,
        }
    }

    /// Whether a handle still addresses a message of this timeline.
    #[must_use]
    pub fn is_current(&self, handle: TurnHandle) -> bool {
        handle.generation == self.generation && handle.index < self.messages.len()
    }

    /// Message addressed by a handle, if the handle is still current.
    pub fn get_mut(&mut self, handle: TurnHandle) -> Option<&mut Message> {
        if self.is_current(handle) {
            self.messages.get_mut(handle.index)
        } else {
            None
        }
    }

    /// Message addressed by a handle, if the handle is still current.
    #[must_use]
    pub fn get(&self, handle: TurnHandle) -> Option<&Message> {
        if self.is_current(handle) {
            self.messages.get(handle.index)
        } else {
            None
        }
    }
}

// =============================================================================
// Pending State
// =============================================================================

/// Phase of the message dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// Nothing queued or in flight.
    #[default]
    Idle,
    /// A message is waiting to be dispatched.
    Queued,
    /// The turn has started; the session is being resolved or the stream opened.
    Sending,
    /// Records are being applied.
    Streaming,
}

/// Loading flags of the conversation view.
///
/// `is_thinking` implies `is_loading`; `queued` and `is_loading` are not both
/// set at steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingState {
    /// A turn is in flight or a session is being opened.
    pub is_loading: bool,
    /// The stream is open and no record has arrived yet.
    pub is_thinking: bool,
    /// A message waits to be dispatched.
    pub queued: bool,
}

/// The active session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Server-assigned id; absent until the first message is sent.
    pub id: Option<SessionId>,
    /// Assistant used for the session.
    pub assistant_id: Option<AssistantId>,
}

// =============================================================================
// Chat State
// =============================================================================

/// Everything the conversation view renders.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    /// Active session.
    pub session: SessionState,
    /// Message timeline of the active session.
    pub timeline: Timeline,
    /// Past sessions, in server order.
    pub history: Vec<HistoryEntry>,
    /// Assistant catalogue.
    pub assistants: Vec<Assistant>,
    /// Loading flags.
    pub pending: PendingState,
    /// Dispatcher phase.
    pub dispatch: DispatchState,
    /// Input buffer of the conversation view.
    pub input: String,
    /// Whether the catalogue and history have been loaded.
    pub ready: bool,
}

impl ChatState {
    /// Detach from the current conversation.
    pub(crate) fn clear_conversation(&mut self) {
        self.timeline.clear();
        self.session.id = None;
        self.pending = PendingState::default();
        self.dispatch = DispatchState::Idle;
    }

    /// Assistant with the given id.
    #[must_use]
    pub fn assistant(&self, id: &AssistantId) -> Option<&Assistant> {
        self.assistants.iter().find(|a| &a.id == id)
    }

    /// History entry with the given id.
    #[must_use]
    pub fn history_entry(&self, id: &SessionId) -> Option<&HistoryEntry> {
        self.history.iter().find(|h| &h.id == id)
    }
}

/// Change notification broadcast by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Messages were added, replaced or updated.
    TimelineChanged,
    /// The active session changed.
    SessionChanged(Option<SessionId>),
    /// The history list changed.
    HistoryChanged,
    /// The assistant catalogue or selection changed.
    AssistantsChanged,
    /// Loading flags or dispatcher phase changed.
    PendingChanged,
    /// The store finished loading.
    Ready,
}

// =============================================================================
// Store
// =============================================================================

/// Shared handle to the conversation state.
///
/// Clones share the same state, event channel and cancellation signal.
#[derive(Debug, Clone)]
pub struct ChatStore {
    state: Arc<Mutex<ChatState>>,
    events: broadcast::Sender<ChatEvent>,
    cancel: CancelSignal,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ChatState::default())),
            events,
            cancel: CancelSignal::new(),
        }
    }

    /// Register for change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// The abort flag shared with the active stream reader.
    #[must_use]
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// A copy of the full state.
    #[must_use]
    pub fn snapshot(&self) -> ChatState {
        self.state.lock().clone()
    }

    /// Read from the state.
    pub fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Mutate the state, then broadcast `events`.
    pub(crate) fn update<R>(&self, events: &[ChatEvent], f: impl FnOnce(&mut ChatState) -> R) -> R {
        self.update_with(|s, emit| {
            emit.extend_from_slice(events);
            f(s)
        })
    }

    /// Mutate the state; `f` records the events its changes caused. They are
    /// broadcast after the lock is released.
    pub(crate) fn update_with<R>(
        &self,
        f: impl FnOnce(&mut ChatState, &mut Vec<ChatEvent>) -> R,
    ) -> R {
        let mut events = Vec::new();
        let result = f(&mut self.state.lock(), &mut events);
        for event in events {
            self.emit(event);
        }
        result
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Messages of the active timeline.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.read(|s| s.timeline.messages().to_vec())
    }

    /// Active session id.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.read(|s| s.session.id.clone())
    }

    /// Assistant used for the next session creation.
    #[must_use]
    pub fn selected_assistant(&self) -> Option<AssistantId> {
        self.read(|s| s.session.assistant_id.clone())
    }

    /// Loading flags.
    #[must_use]
    pub fn pending(&self) -> PendingState {
        self.read(|s| s.pending)
    }

    /// Whether a turn is in flight or a session is loading.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.read(|s| s.pending.is_loading)
    }

    /// Dispatcher phase.
    #[must_use]
    pub fn dispatch_state(&self) -> DispatchState {
        self.read(|s| s.dispatch)
    }

    /// History list in server order.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read(|s| s.history.clone())
    }

    /// Assistant catalogue.
    #[must_use]
    pub fn assistants(&self) -> Vec<Assistant> {
        self.read(|s| s.assistants.clone())
    }

    /// Current input buffer.
    #[must_use]
    pub fn input(&self) -> String {
        self.read(|s| s.input.clone())
    }

    /// Replace the input buffer.
    pub fn set_input(&self, input: impl Into<String>) {
        let input = input.into();
        self.update_with(|s, _| s.input = input);
    }

    /// Whether the catalogue and history have been loaded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.read(|s| s.ready)
    }
}
