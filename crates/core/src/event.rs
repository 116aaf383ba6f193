//! The inbound event model and the outbound frames delivered back to the
//! real-time platform.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, source-assigned identifier for a single delivery attempt.
///
/// The platform delivers at-least-once, so the same id may arrive more than
/// once; uniqueness is per delivery attempt, not per logical message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the channel an event originated from (and where responses
/// are rendered).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the author of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(String);

impl AuthorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bridge-level commands the platform exposes to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Establish the supervised connection.
    Join,
    /// Tear the supervised connection down.
    Leave,
    /// Report connection status into the originating channel.
    Status,
}

impl fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeCommand::Join => f.write_str("join"),
            BridgeCommand::Leave => f.write_str("leave"),
            BridgeCommand::Status => f.write_str("status"),
        }
    }
}

/// What the platform delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Text(String),
    /// Raw captured audio; transcription happens backend-side.
    Audio(Bytes),
    Command(BridgeCommand),
}

/// A single inbound delivery from the platform. Immutable once constructed;
/// consumed exactly once by the orchestrator.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: EventId,
    pub channel: ChannelId,
    pub author: AuthorId,
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Stamps `received_at` with the current time.
    pub fn new(id: EventId, channel: ChannelId, author: AuthorId, payload: EventPayload) -> Self {
        Self {
            id,
            channel,
            author,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// A frame delivered to the front end through the active connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text {
        channel: ChannelId,
        content: String,
    },
    /// Base64-encoded, playback-ready audio, passed through from the
    /// backend untouched.
    Audio {
        channel: ChannelId,
        audio: String,
    },
    /// Structured mood/gesture hints, passed through opaquely.
    Directives {
        channel: ChannelId,
        payload: serde_json::Value,
    },
    /// Ephemeral "is composing" indicator.
    Presence { channel: ChannelId },
}
