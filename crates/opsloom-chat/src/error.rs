//! Error types for the conversation layer.

use opsloom_client::ClientError;
use opsloom_core::AssistantId;
use thiserror::Error;

/// A result type using `ChatError`.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur while driving a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The service call failed or its stream was malformed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A session had to be created but no assistant is selected.
    #[error("no assistant selected")]
    NoAssistant,

    /// The requested assistant is not in the catalogue.
    #[error("unknown assistant: {0}")]
    UnknownAssistant(AssistantId),
}

impl ChatError {
    /// Text written to the timeline when a turn fails.
    #[must_use]
    pub fn user_message(&self) -> String {
        let detail = match self {
            Self::Client(err) => err.detail(),
            other => other.to_string(),
        };
        format!(
            "An error occurred: {}. Please try again.",
            detail.trim_end_matches('.')
        )
    }
}
