//! Core types for the opsloom chat client.
//!
//! This crate provides the foundational types shared by the transport and the
//! conversation layer:
//!
//! - **Identifiers**: opaque, server-assigned ids for sessions, assistants and messages
//! - **Cancellation**: the abort flag that stops an in-flight response stream
//!
//! # Example
//!
//! ```
//! use opsloom_core::{CancelSignal, SessionId};
//!
//! let session_id = SessionId::new("7c9e6679-7425-40de-944b-e07fc1f90ae7").unwrap();
//! assert_eq!(session_id.as_str(), "7c9e6679-7425-40de-944b-e07fc1f90ae7");
//!
//! let signal = CancelSignal::new();
//! signal.raise();
//! assert!(signal.is_raised());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod ids;

pub use cancel::CancelSignal;
pub use ids::{AssistantId, IdError, MessageId, SessionId};
