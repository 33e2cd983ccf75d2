//! Conversation orchestration for the opsloom chat client.
//!
//! This crate owns the conversation state and drives it against a
//! [`Transport`](opsloom_client::Transport):
//!
//! - [`ChatStore`]: the shared state and its change notifications
//! - [`SessionController`]: session creation, opening, history and titles
//! - [`Dispatcher`]: the queue/submit state machine for one turn at a time
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   enqueue / dispatch   ┌──────────────────┐
//! │    caller    │ ─────────────────────▶ │    Dispatcher    │
//! └──────────────┘                        └────────┬─────────┘
//!        ▲                                         │ ensure_session
//!        │ ChatEvent                               ▼
//! ┌──────┴───────┐        mutations       ┌──────────────────┐
//! │  ChatStore   │ ◀───────────────────── │ SessionController│
//! └──────────────┘                        └────────┬─────────┘
//!                                                  ▼
//!                                            Transport (HTTP)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dispatcher;
pub mod error;
pub mod session;
pub mod state;

pub use dispatcher::{Dispatcher, TurnOutcome};
pub use error::{ChatError, Result};
pub use session::{EnsuredSession, SessionController, TitleBackfill};
pub use state::{
    ChatEvent, ChatState, ChatStore, DispatchState, PendingState, SessionState, Timeline,
    TurnHandle,
};
