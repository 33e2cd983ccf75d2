//! HTTP transport for the assistant service.
//!
//! The [`Transport`] trait is the seam between the conversation layer and the
//! network. [`HttpTransport`] is the reqwest implementation; tests use the
//! in-memory mock from [`crate::mock`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;

use opsloom_core::{AssistantId, MessageId, SessionId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::types::{
    ApiErrorResponse, Assistant, AssistantListResponse, ChatRequest, CreateSessionRequest,
    CreateSessionResponse, Feedback, FeedbackRequest, HistoryEntry, Message,
    MessageListResponse, SessionInfo, SessionListResponse,
};

/// Raw body of a streamed response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Calls the conversation layer makes against the assistant service.
///
/// Implementations attach credentials to every call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a session for the given assistant. The server assigns the id.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` on a non-2xx status or network failure.
    async fn create_session(&self, assistant_id: &AssistantId) -> Result<SessionInfo>;

    /// Submit a user message and return the raw response body.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` if the handshake is not 2xx. Errors while
    /// reading the body are yielded by the stream.
    async fn submit_message(&self, session_id: &SessionId, text: &str) -> Result<ByteStream>;

    /// Fetch the stored timeline of a session.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` on failure.
    async fn fetch_timeline(&self, session_id: &SessionId) -> Result<Vec<Message>>;

    /// Fetch the session history of the current user.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` on failure.
    async fn fetch_history(&self) -> Result<Vec<HistoryEntry>>;

    /// Fetch the configured assistants.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` on failure.
    async fn fetch_assistants(&self) -> Result<Vec<Assistant>>;

    /// Rate an assistant reply.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` on failure.
    async fn submit_feedback(&self, message_id: &MessageId, feedback: Feedback) -> Result<()>;
}

/// reqwest implementation of [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    headers: HeaderMap,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the credentials are not valid header
    /// values or the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;

        Self::with_client(client, config)
    }

    /// Build a transport around a preconfigured reqwest client.
    ///
    /// Credentials from `config` are attached to every request.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the credentials are not valid header values.
    pub fn with_client(client: Client, config: &ClientConfig) -> Result<Self> {
        let mut headers = config.credentials.headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(Self {
            client,
            base_url: config.normalized_base_url().to_string(),
            headers,
            request_timeout: config.request_timeout(),
        })
    }

    /// Get the service root.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx response into a `ClientError`, preferring the server detail.
    async fn handle_error(response: Response) -> ClientError {
        let status = response.status();
        let detail = match response.json::<ApiErrorResponse>().await {
            Ok(body) => body.detail_text(),
            Err(_) => None,
        };

        tracing::debug!(
            status = %status,
            detail = ?detail,
            "Service returned an error response"
        );

        ClientError::request(Some(status.as_u16()), detail)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|e| {
            tracing::debug!(error = %e, "Failed to parse response body");
            ClientError::request(Some(status), None)
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .headers(self.headers.clone())
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .headers(self.headers.clone())
            .json(body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::read_json(response).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create_session(&self, assistant_id: &AssistantId) -> Result<SessionInfo> {
        let body: CreateSessionResponse = self
            .post_json("/chat/session", &CreateSessionRequest { assistant_id })
            .await?;

        tracing::debug!(
            assistant_id = %assistant_id,
            session_id = %body.session.id,
            "Created session"
        );
        Ok(body.session)
    }

    async fn submit_message(&self, session_id: &SessionId, text: &str) -> Result<ByteStream> {
        // No total timeout: the body stays open for as long as the reply streams.
        let response = self
            .client
            .post(self.url("/chat"))
            .headers(self.headers.clone())
            .json(&ChatRequest::user(session_id, text))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        tracing::debug!(session_id = %session_id, "Opened response stream");

        let body = response.bytes_stream().map_err(ClientError::from);
        Ok(body.boxed())
    }

    async fn fetch_timeline(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let body: MessageListResponse = self
            .get_json("/chat/messages", &[("session_id", session_id.as_str())])
            .await?;
        Ok(body.messages)
    }

    async fn fetch_history(&self) -> Result<Vec<HistoryEntry>> {
        let body: SessionListResponse = self.get_json("/chat/session", &[]).await?;
        Ok(body.list)
    }

    async fn fetch_assistants(&self) -> Result<Vec<Assistant>> {
        let body: AssistantListResponse = self.get_json("/assistant", &[]).await?;
        Ok(body.assistants)
    }

    async fn submit_feedback(&self, message_id: &MessageId, feedback: Feedback) -> Result<()> {
        let _: IgnoredAny = self
            .post_json("/chat/feedback", &FeedbackRequest { message_id, feedback })
            .await?;

        tracing::debug!(message_id = %message_id, feedback = ?feedback, "Submitted feedback");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    #[test]
    fn base_url_is_normalized() {
        let transport =
            HttpTransport::new(&ClientConfig::new("http://localhost:8080/opsloom-api/v1/")).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8080/opsloom-api/v1");
        assert_eq!(
            transport.url("/chat/session"),
            "http://localhost:8080/opsloom-api/v1/chat/session"
        );
    }

    #[test]
    fn invalid_credentials_fail_construction() {
        let config = ClientConfig::default().with_credentials(Credentials::Bearer("a\u{7f}b".into()));
        let err = HttpTransport::new(&config).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
