//! Axum Handlers for the Webhook Ingress and Operational Surface
//!
//! The platform pushes events here at-least-once; duplicates are accepted
//! and filtered downstream. `/status` exposes the connection state and
//! retry budget for external monitoring.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};
use utoipa::ToSchema;
use voxbridge_core::event::{
    AuthorId, BridgeCommand, ChannelId, EventId, EventPayload, InboundEvent,
};

use crate::{state::AppState, supervisor::ConnectionState};

pub enum ApiError {
    BadRequest(String),
    Overloaded,
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Overloaded => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    message: "inbound queue is full".to_string(),
                }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

/// One event delivery from the platform.
#[derive(Deserialize, ToSchema)]
pub struct EventEnvelope {
    /// Source-assigned delivery id, used for duplicate filtering.
    #[schema(example = "1398212")]
    pub id: String,
    pub channel: String,
    pub author: String,
    #[serde(flatten)]
    pub body: EventBody,
}

#[derive(Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    Message {
        content: String,
    },
    Voice {
        /// Base64-encoded captured audio.
        audio: String,
    },
    Command {
        #[schema(value_type = String, example = "join")]
        name: BridgeCommand,
    },
}

impl EventBody {
    fn into_payload(self) -> Result<EventPayload, ApiError> {
        match self {
            EventBody::Message { content } => Ok(EventPayload::Text(content)),
            EventBody::Voice { audio } => BASE64
                .decode(&audio)
                .map(|decoded| EventPayload::Audio(Bytes::from(decoded)))
                .map_err(|e| ApiError::BadRequest(format!("audio is not valid base64: {e}"))),
            EventBody::Command { name } => Ok(EventPayload::Command(name)),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub state: ConnectionState,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

/// Accept one event delivery from the platform.
#[utoipa::path(
    post,
    path = "/events",
    request_body = EventEnvelope,
    responses(
        (status = 202, description = "Event accepted for processing", body = AcceptedResponse),
        (status = 400, description = "Malformed envelope", body = ErrorResponse),
        (status = 503, description = "Inbound queue is full", body = ErrorResponse)
    )
)]
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<EventEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = envelope.body.into_payload()?;
    let event = InboundEvent::new(
        EventId::new(envelope.id),
        ChannelId::new(envelope.channel),
        AuthorId::new(envelope.author),
        payload,
    );

    match state.inbound_tx.try_send(event) {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: true }))),
        Err(TrySendError::Full(event)) => {
            debug!(event_id = %event.id, "shedding delivery, inbound queue full");
            Err(ApiError::Overloaded)
        }
        Err(TrySendError::Closed(_)) => Err(ApiError::InternalServerError(anyhow::anyhow!(
            "inbound queue closed"
        ))),
    }
}

/// Report the supervised connection's state and retry budget.
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Current connection status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.supervisor.status();
    Json(StatusResponse {
        state: status.state,
        attempts_made: status.attempts_made,
        max_attempts: status.max_attempts,
    })
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is running"))
)]
pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn app_state(queue_depth: usize) -> (Arc<AppState>, mpsc::Receiver<InboundEvent>) {
        let (supervisor, _cmd_rx, _status_tx) =
            crate::supervisor::SupervisorHandle::stub(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_depth);
        (
            Arc::new(AppState {
                supervisor,
                inbound_tx,
            }),
            inbound_rx,
        )
    }

    fn message_envelope(id: &str) -> EventEnvelope {
        EventEnvelope {
            id: id.to_string(),
            channel: "general".to_string(),
            author: "alice".to_string(),
            body: EventBody::Message {
                content: "hello".to_string(),
            },
        }
    }

    async fn post(state: Arc<AppState>, envelope: EventEnvelope) -> StatusCode {
        match ingest_event(State(state), Json(envelope)).await {
            Ok(response) => response.into_response().status(),
            Err(error) => error.into_response().status(),
        }
    }

    #[test]
    fn envelope_deserializes_with_a_flattened_body() {
        let envelope: EventEnvelope = serde_json::from_str(
            r#"{"id":"1","channel":"general","author":"alice","kind":"message","content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(envelope.id, "1");
        assert!(matches!(envelope.body, EventBody::Message { .. }));

        let envelope: EventEnvelope = serde_json::from_str(
            r#"{"id":"2","channel":"general","author":"alice","kind":"command","name":"join"}"#,
        )
        .unwrap();
        assert!(matches!(
            envelope.body,
            EventBody::Command {
                name: BridgeCommand::Join
            }
        ));
    }

    #[tokio::test]
    async fn fresh_and_duplicate_deliveries_are_both_accepted() {
        let (state, mut inbound_rx) = app_state(8);

        assert_eq!(post(state.clone(), message_envelope("e1")).await, StatusCode::ACCEPTED);
        // At-least-once delivery: redeliveries are acknowledged identically
        // and filtered downstream.
        assert_eq!(post(state, message_envelope("e1")).await, StatusCode::ACCEPTED);

        assert_eq!(inbound_rx.recv().await.unwrap().id, EventId::new("e1"));
        assert_eq!(inbound_rx.recv().await.unwrap().id, EventId::new("e1"));
    }

    #[tokio::test]
    async fn full_queue_sheds_with_service_unavailable() {
        let (state, _inbound_rx) = app_state(1);

        assert_eq!(post(state.clone(), message_envelope("e1")).await, StatusCode::ACCEPTED);
        assert_eq!(
            post(state, message_envelope("e2")).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn undecodable_audio_is_a_bad_request() {
        let (state, _inbound_rx) = app_state(8);
        let envelope = EventEnvelope {
            id: "v1".to_string(),
            channel: "general".to_string(),
            author: "alice".to_string(),
            body: EventBody::Voice {
                audio: "!!not-base64!!".to_string(),
            },
        };
        assert_eq!(post(state, envelope).await, StatusCode::BAD_REQUEST);
    }
}
