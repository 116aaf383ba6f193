//! The platform transport seam and its WebSocket implementation.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, warn};
use voxbridge_core::event::{
    AuthorId, BridgeCommand, ChannelId, EventId, EventPayload, InboundEvent, OutboundFrame,
};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("probe not acknowledged")]
    ProbeFailed,
    #[error("command registration failed: {0}")]
    Registration(String),
}

/// Something read off the live connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    Inbound(InboundEvent),
    /// The transport signalled an unexpected close.
    Closed,
}

/// A live, established platform connection.
#[async_trait]
pub trait Connection: Send {
    /// Next event off the connection; `None` once the stream is finished.
    async fn recv(&mut self) -> Option<ConnectionEvent>;
    /// Deliver one outbound frame to the front end.
    async fn deliver(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;
    /// Round-trip liveness probe. The caller bounds the wait.
    async fn probe(&mut self) -> Result<(), TransportError>;
    /// Release transport resources.
    async fn shutdown(&mut self);
}

/// Establishes platform connections and performs registration calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;
    async fn register_commands(&self) -> Result<(), TransportError>;
}

/// A command exposed to platform users.
#[derive(Debug, Clone, Serialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
}

/// Wire envelope for events the gateway pushes over the socket.
#[derive(Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
enum GatewayEvent {
    MessageCreate {
        id: String,
        channel: String,
        author: String,
        content: String,
    },
    VoiceData {
        id: String,
        channel: String,
        author: String,
        audio: String,
    },
    Command {
        id: String,
        channel: String,
        author: String,
        name: BridgeCommand,
    },
}

fn map_event(event: GatewayEvent) -> Option<InboundEvent> {
    match event {
        GatewayEvent::MessageCreate {
            id,
            channel,
            author,
            content,
        } => Some(InboundEvent::new(
            EventId::new(id),
            ChannelId::new(channel),
            AuthorId::new(author),
            EventPayload::Text(content),
        )),
        GatewayEvent::VoiceData {
            id,
            channel,
            author,
            audio,
        } => match BASE64.decode(&audio) {
            Ok(decoded) => Some(InboundEvent::new(
                EventId::new(id),
                ChannelId::new(channel),
                AuthorId::new(author),
                EventPayload::Audio(Bytes::from(decoded)),
            )),
            Err(error) => {
                warn!(%id, %error, "dropping voice event with undecodable audio");
                None
            }
        },
        GatewayEvent::Command {
            id,
            channel,
            author,
            name,
        } => Some(InboundEvent::new(
            EventId::new(id),
            ChannelId::new(channel),
            AuthorId::new(author),
            EventPayload::Command(name),
        )),
    }
}

/// Production transport over the platform's WebSocket gateway.
pub struct WsTransport {
    gateway_url: String,
    token: String,
    commands_url: Option<String>,
    commands: Vec<CommandSpec>,
    http: reqwest::Client,
}

impl WsTransport {
    pub fn new(gateway_url: String, token: String, commands_url: Option<String>) -> Self {
        let commands = vec![
            CommandSpec {
                name: "join".into(),
                description: "Bring the assistant into this voice channel".into(),
            },
            CommandSpec {
                name: "leave".into(),
                description: "Disconnect the assistant from voice".into(),
            },
            CommandSpec {
                name: "status".into(),
                description: "Report the assistant's connection status".into(),
            },
        ];
        Self {
            gateway_url,
            token,
            commands_url,
            commands,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let mut request = self
            .gateway_url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let auth = format!("Bot {}", self.token)
            .parse()
            .map_err(|_| TransportError::Handshake("invalid authorization header".to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(gateway = %self.gateway_url, "gateway handshake complete");
        Ok(Box::new(WsConnection::spawn(stream)))
    }

    async fn register_commands(&self) -> Result<(), TransportError> {
        let Some(url) = &self.commands_url else {
            debug!("no commands endpoint configured, skipping registration");
            return Ok(());
        };
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(&self.commands)
            .send()
            .await
            .map_err(|e| TransportError::Registration(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Registration(format!(
                "registration returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct WsConnection {
    sink: WsSink,
    events_rx: mpsc::Receiver<ConnectionEvent>,
    pong_rx: mpsc::Receiver<Bytes>,
    read_task: JoinHandle<()>,
}

impl WsConnection {
    fn spawn(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let (sink, source) = stream.split();
        let (events_tx, events_rx) = mpsc::channel(64);
        let (pong_tx, pong_rx) = mpsc::channel(8);
        let read_task = tokio::spawn(read_loop(source, events_tx, pong_tx));
        Self {
            sink,
            events_rx,
            pong_rx,
            read_task,
        }
    }
}

async fn read_loop(
    mut source: WsSource,
    events_tx: mpsc::Sender<ConnectionEvent>,
    pong_tx: mpsc::Sender<Bytes>,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<GatewayEvent>(&text) {
                Ok(event) => {
                    if let Some(inbound) = map_event(event) {
                        if events_tx.send(ConnectionEvent::Inbound(inbound)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(error) => debug!(%error, "ignoring unrecognized gateway frame"),
            },
            Ok(WsMessage::Pong(payload)) => {
                let _ = pong_tx.send(payload).await;
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Binary(_)) | Ok(WsMessage::Frame(_)) => {}
            Ok(WsMessage::Close(_)) => break,
            Err(error) => {
                warn!(%error, "gateway read failed");
                break;
            }
        }
    }
    let _ = events_tx.send(ConnectionEvent::Closed).await;
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events_rx.recv().await
    }

    async fn deliver(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let message = match frame {
            OutboundFrame::Text { channel, content } => {
                json!({"op": "message", "channel": channel, "content": content})
            }
            OutboundFrame::Audio { channel, audio } => {
                json!({"op": "speak", "channel": channel, "audio": audio})
            }
            OutboundFrame::Directives { channel, payload } => {
                json!({"op": "directives", "channel": channel, "payload": payload})
            }
            OutboundFrame::Presence { channel } => {
                json!({"op": "typing", "channel": channel})
            }
        };
        self.sink
            .send(WsMessage::Text(message.to_string().into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        let nonce: [u8; 8] = rand::random();
        self.sink
            .send(WsMessage::Ping(Bytes::copy_from_slice(&nonce)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        // Stale pongs from earlier probes may still be queued; drain until
        // the matching payload arrives.
        while let Some(payload) = self.pong_rx.recv().await {
            if payload.as_ref() == nonce.as_slice() {
                return Ok(());
            }
        }
        Err(TransportError::ProbeFailed)
    }

    async fn shutdown(&mut self) {
        let _ = self.sink.send(WsMessage::Close(None)).await;
        self.read_task.abort();
    }
}
