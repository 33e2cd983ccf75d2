//! HTTP transport and stream decoding for the opsloom assistant service.
//!
//! This crate provides:
//!
//! - **Wire types** for sessions, messages, history, assistants and feedback
//! - **Transport**: the [`Transport`] trait and its reqwest implementation
//! - **Stream decoding**: newline-delimited JSON records from the chat response body
//!
//! With the `test-utils` feature, [`mock::MockTransport`] serves scripted
//! responses from memory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::{ClientConfig, Credentials, DEFAULT_BASE_URL};
pub use decoder::{LineDecoder, RecordStream};
pub use error::{ClientError, Result, GENERIC_FAILURE};
pub use transport::{ByteStream, HttpTransport, Transport};
pub use types::{
    Assistant, AssistantMetadata, ContentBlock, Feedback, HistoryEntry, Message, MessageContent,
    Role, SessionInfo, Source, StreamRecord, TypedBlock,
};
