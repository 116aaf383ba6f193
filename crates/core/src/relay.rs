//! The reasoning-backend seam: request/response types, the error taxonomy,
//! and the HTTP client used in production.

use crate::event::{AuthorId, ChannelId, EventPayload};
use crate::history::ConversationTurn;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The new input for a single relay call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayInput {
    Text { text: String },
    /// Base64-encoded captured audio for backend-side transcription.
    Audio { audio: String },
}

impl RelayInput {
    /// Commands are handled by the bridge itself and never relayed.
    pub fn from_payload(payload: &EventPayload) -> Option<Self> {
        match payload {
            EventPayload::Text(text) => Some(RelayInput::Text { text: text.clone() }),
            EventPayload::Audio(bytes) => Some(RelayInput::Audio {
                audio: BASE64.encode(bytes),
            }),
            EventPayload::Command(_) => None,
        }
    }
}

/// A single request to the reasoning backend, carrying a bounded slice of
/// prior turns so backend cost stays bounded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayRequest {
    pub session: String,
    pub input: RelayInput,
    pub conversation: Vec<ConversationTurn>,
}

impl RelayRequest {
    /// Session keys are scoped per channel and author so the backend keeps a
    /// distinct thread for each speaker.
    pub fn session_key(channel: &ChannelId, author: &AuthorId) -> String {
        format!("{channel}:{author}")
    }
}

/// The backend's rendered output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub text: String,
    /// Backend-side transcription of audio input, when the input was audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// Base64-encoded, playback-ready audio. Passed through opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Structured mood/gesture hints. Passed through opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directives: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Network or transport fault; the caller may retry, bounded.
    #[error("reasoning backend unreachable: {0}")]
    BackendUnavailable(String),
    /// The backend answered with a structured error; surfaced, never retried.
    #[error("reasoning backend error: {0}")]
    BackendError(String),
    /// The bounded wait elapsed; treated like `BackendUnavailable`.
    #[error("reasoning backend timed out after {0:?}")]
    Timeout(Duration),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::BackendUnavailable(_) | RelayError::Timeout(_)
        )
    }
}

/// A client for the reasoning backend.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn relay(&self, request: RelayRequest) -> Result<RelayResponse, RelayError>;
}

/// Error body shape the backend uses for structured failures.
#[derive(Deserialize)]
struct BackendErrorBody {
    error: String,
}

/// `RelayClient` over plain HTTP, for any backend exposing the relay
/// endpoint as POST `{base}/relay`.
pub struct HttpRelayClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpRelayClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/relay", base_url.trim_end_matches('/')),
            timeout,
        })
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn relay(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        debug!(
            session = %request.session,
            turns = request.conversation.len(),
            "relaying to reasoning backend"
        );
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    RelayError::Timeout(self.timeout)
                } else {
                    RelayError::BackendUnavailable(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<BackendErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("backend returned {status}"),
            };
            return Err(RelayError::BackendError(message));
        }

        response
            .json::<RelayResponse>()
            .await
            .map_err(|error| RelayError::BackendError(format!("malformed backend response: {error}")))
    }
}
