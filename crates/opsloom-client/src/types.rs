//! Wire types for the assistant service API.
//!
//! These types mirror the JSON bodies exchanged with the service. Message
//! content blocks are kept close to their JSON form: the client never renders
//! them, it only carries them from the stream into the timeline.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use opsloom_core::{AssistantId, MessageId, SessionId};

// =============================================================================
// Content
// =============================================================================

/// One renderable unit of an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    /// A bare string block.
    Plain(String),
    /// An object block tagged by its `type` field (text, table, chart...).
    Typed(TypedBlock),
    /// Any other JSON value, preserved verbatim.
    Other(serde_json::Value),
}

/// An object block with a `type` tag and arbitrary attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedBlock {
    /// Block kind, e.g. `"text"`, `"table"`, `"dialog"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining attributes of the block.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ContentBlock {
    /// Build a `{"type":"text","text":...}` block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("text".to_string(), serde_json::Value::String(text.into()));
        Self::Typed(TypedBlock {
            kind: "text".to_string(),
            fields,
        })
    }

    /// The block's text, for bare strings and `text` blocks.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Plain(text) => Some(text),
            Self::Typed(block) if block.kind == "text" => {
                block.fields.get("text").and_then(serde_json::Value::as_str)
            }
            Self::Typed(_) | Self::Other(_) => None,
        }
    }

    /// The block kind (`"text"` for bare strings).
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => Some("text"),
            Self::Typed(block) => Some(&block.kind),
            Self::Other(_) => None,
        }
    }
}

/// Message content: a list of blocks, or a raw string for plain replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Structured blocks.
    Blocks(Vec<ContentBlock>),
    /// Plain text (user messages and legacy replies).
    Text(String),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

impl MessageContent {
    /// Whether there is nothing to render yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Blocks(blocks) => blocks.is_empty(),
            Self::Text(text) => text.is_empty(),
        }
    }

    /// Concatenated text of all text-bearing blocks.
    #[must_use]
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

/// A retrieval source cited by an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Display name of the source.
    pub source: String,
    /// Link to the source document.
    #[serde(default)]
    pub link: String,
}

// =============================================================================
// Messages
// =============================================================================

/// Author of a timeline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The remote assistant.
    #[serde(alias = "ai")]
    Assistant,
}

/// One entry of the message timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage")]
pub struct Message {
    /// Author of the message.
    pub role: Role,
    /// Content to render.
    pub blocks: MessageContent,
    /// Server id of the stored message pair (absent while unconfirmed).
    #[serde(rename = "message_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Sources cited by the reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    /// Set on synthetic messages reporting a failed turn.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    /// A finalized user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: MessageContent::Text(text.into()),
            id: None,
            sources: None,
            is_error: false,
        }
    }

    /// An assistant message with the given content.
    #[must_use]
    pub fn assistant(blocks: impl Into<MessageContent>, id: Option<MessageId>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: blocks.into(),
            id,
            sources: None,
            is_error: false,
        }
    }

    /// The empty assistant message appended when a turn starts.
    #[must_use]
    pub fn placeholder() -> Self {
        Self::assistant(MessageContent::default(), None)
    }

    /// A synthetic assistant message reporting a failed turn.
    #[must_use]
    pub fn assistant_error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(MessageContent::Text(text.into()), None)
        }
    }

    /// Whether this is an assistant message with nothing to render yet.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant && !self.is_error && self.blocks.is_empty()
    }

    /// Whether the message was written by the user.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Message shape returned by `GET /chat/messages`.
#[derive(Debug, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    blocks: Option<MessageContent>,
    #[serde(default, alias = "id")]
    message_id: Option<MessageId>,
    #[serde(default)]
    sources: Option<Vec<Source>>,
    #[serde(default)]
    is_error: bool,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let blocks = match (wire.blocks, wire.content) {
            (Some(blocks), _) if !blocks.is_empty() => blocks,
            (_, Some(content)) => MessageContent::Text(content),
            (blocks, None) => blocks.unwrap_or_default(),
        };
        Self {
            role: wire.role,
            blocks,
            id: wire.message_id,
            sources: wire.sources,
            is_error: wire.is_error,
        }
    }
}

// =============================================================================
// Stream Records
// =============================================================================

/// One line of the `POST /chat` response stream.
///
/// Each record is a full snapshot of the in-progress reply, not a delta. A
/// title generated after the answer arrives as a record with only `title`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Current content of the reply; absent on a title-only record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<MessageContent>,
    /// Id of the stored message pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Generated session title, sent once it is known.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    /// Sources cited by the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

// =============================================================================
// Sessions and History
// =============================================================================

/// A past session as listed by `GET /chat/session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Session id.
    pub id: SessionId,
    /// Generated title, absent until the first reply names the session.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub title: Option<String>,
    /// Creation time.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Assistant the session talks to.
    pub assistant_id: AssistantId,
}

/// Session descriptor returned on creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Server-assigned session id.
    pub id: SessionId,
    /// Owning assistant, when echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<AssistantId>,
}

/// Request body for `POST /chat/session`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest<'a> {
    /// Assistant the new session talks to.
    pub assistant_id: &'a AssistantId,
}

/// Response for `POST /chat/session`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    /// The created session.
    pub session: SessionInfo,
}

/// Response for `GET /chat/session`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionListResponse {
    /// Sessions of the current user.
    pub list: Vec<HistoryEntry>,
}

/// Response for `GET /chat/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageListResponse {
    /// Stored timeline of the session.
    pub messages: Vec<Message>,
}

/// Outgoing user message.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage<'a> {
    /// Always `user`.
    pub role: Role,
    /// Raw input text.
    pub content: &'a str,
}

/// Request body for `POST /chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    /// Target session.
    pub session_id: &'a SessionId,
    /// The message to answer.
    pub message: OutgoingMessage<'a>,
}

impl<'a> ChatRequest<'a> {
    /// Build a request carrying a user message.
    #[must_use]
    pub fn user(session_id: &'a SessionId, content: &'a str) -> Self {
        Self {
            session_id,
            message: OutgoingMessage {
                role: Role::User,
                content,
            },
        }
    }
}

// =============================================================================
// Assistants
// =============================================================================

/// Display metadata of an assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMetadata {
    /// Display title.
    pub title: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Icon name.
    #[serde(default)]
    pub icon: String,
    /// Suggested starter prompts.
    #[serde(default)]
    pub prompts: Option<Vec<String>>,
}

/// An assistant configured on the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    /// Assistant id.
    pub id: AssistantId,
    /// Internal name.
    pub name: String,
    /// Display metadata.
    #[serde(default, alias = "assistant_metadata")]
    pub metadata: Option<AssistantMetadata>,
}

impl Assistant {
    /// Title to show for this assistant.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.metadata
            .as_ref()
            .map_or(self.name.as_str(), |m| m.title.as_str())
    }
}

/// Response for `GET /assistant`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantListResponse {
    /// Available assistants.
    #[serde(default)]
    pub assistants: Vec<Assistant>,
}

// =============================================================================
// Feedback
// =============================================================================

/// A rating of an assistant reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Feedback {
    /// Thumbs down.
    Negative,
    /// Rating withdrawn.
    Neutral,
    /// Thumbs up.
    Positive,
}

impl From<Feedback> for i8 {
    fn from(feedback: Feedback) -> Self {
        match feedback {
            Feedback::Negative => -1,
            Feedback::Neutral => 0,
            Feedback::Positive => 1,
        }
    }
}

impl TryFrom<i8> for Feedback {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Negative),
            0 => Ok(Self::Neutral),
            1 => Ok(Self::Positive),
            other => Err(format!("feedback weight must be -1, 0 or 1, got {other}")),
        }
    }
}

/// Request body for `POST /chat/feedback`.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRequest<'a> {
    /// Rated message.
    pub message_id: &'a MessageId,
    /// Rating.
    pub feedback: Feedback,
}

// =============================================================================
// Error Response
// =============================================================================

/// Error body of a non-2xx response.
///
/// `detail` is usually a string; validation failures carry a list of objects.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Server-supplied description.
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ApiErrorResponse {
    /// The detail as display text, if any was supplied.
    #[must_use]
    pub fn detail_text(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) if text.trim().is_empty() => None,
            serde_json::Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

// =============================================================================
// Serde helpers
// =============================================================================

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Timestamps are naive ISO-8601 on the wire; an explicit offset is also accepted.
mod timestamp {
    use super::{DateTime, Deserialize, Deserializer, NaiveDateTime, Serializer, Utc};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.naive_utc().format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(with_offset) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(with_offset.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
