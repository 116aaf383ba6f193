//! Event intake, filtering, and relay coordination.

use crate::narration;
use crate::supervisor::{ConnectionState, SupervisorHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, error, info, instrument, warn};
use voxbridge_core::{
    dedup::DedupCache,
    event::{BridgeCommand, ChannelId, EventPayload, InboundEvent, OutboundFrame},
    governor::{Decision, OperationClass, RateGovernor},
    history::{ConversationStore, ConversationTurn},
    relay::{RelayClient, RelayError, RelayInput, RelayRequest, RelayResponse},
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub relay_retry_delay: Duration,
    pub fallback_message: String,
    /// Lowercased trigger names; empty means every text event is handled.
    pub wake_words: Vec<String>,
    pub max_message_len: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            relay_retry_delay: Duration::from_secs(2),
            fallback_message: "I can't reach my main systems right now.".to_string(),
            wake_words: Vec::new(),
            max_message_len: 2000,
        }
    }
}

/// Coordinates the inbound pipeline: dedup, state gating, presence, relay,
/// and response delivery.
///
/// The orchestrator is the only component that reads connection state; the
/// cache, governor, and relay client stay state-ignorant.
#[derive(Clone)]
pub struct Orchestrator {
    dedup: Arc<DedupCache>,
    governor: Arc<RateGovernor>,
    relay: Arc<dyn RelayClient>,
    history: Arc<ConversationStore>,
    supervisor: SupervisorHandle,
    settings: Arc<OrchestratorSettings>,
}

impl Orchestrator {
    pub fn new(
        dedup: Arc<DedupCache>,
        governor: Arc<RateGovernor>,
        relay: Arc<dyn RelayClient>,
        history: Arc<ConversationStore>,
        supervisor: SupervisorHandle,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            dedup,
            governor,
            relay,
            history,
            supervisor,
            settings: Arc::new(settings),
        }
    }

    /// Spawns the intake loop: one bounded queue in, one processing lane per
    /// channel, so events from a single source are handled in arrival order
    /// while relay calls for distinct sources run concurrently.
    pub fn spawn(self, mut inbound_rx: mpsc::Receiver<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lanes: HashMap<ChannelId, mpsc::Sender<InboundEvent>> = HashMap::new();
            while let Some(event) = inbound_rx.recv().await {
                let lane = lanes.entry(event.channel.clone()).or_insert_with(|| {
                    let (lane_tx, mut lane_rx) = mpsc::channel::<InboundEvent>(16);
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        while let Some(event) = lane_rx.recv().await {
                            orchestrator.handle_event(event).await;
                        }
                    });
                    lane_tx
                });
                if lane.send(event).await.is_err() {
                    warn!("processing lane closed, dropping event");
                }
            }
            info!("inbound queue closed, orchestrator stopping");
        })
    }

    #[instrument(skip_all, fields(event_id = %event.id, channel = %event.channel))]
    pub async fn handle_event(&self, event: InboundEvent) {
        if !self.dedup.check_and_record(&event.id) {
            debug!("duplicate delivery filtered");
            return;
        }

        if let EventPayload::Command(command) = &event.payload {
            self.handle_command(*command, &event.channel).await;
            return;
        }

        if !self.addressed(&event.payload) {
            debug!("event not addressed to the assistant, ignoring");
            return;
        }

        let state = self.supervisor.state();
        if state != ConnectionState::Active {
            debug!(%state, "connection not active, dropping event");
            return;
        }

        self.send_presence(&event.channel).await;

        let Some(input) = RelayInput::from_payload(&event.payload) else {
            return;
        };
        let request = RelayRequest {
            session: RelayRequest::session_key(&event.channel, &event.author),
            input,
            conversation: self.history.window(&event.channel),
        };

        let response = match self.relay_with_retry(request).await {
            Ok(response) => {
                self.record_exchange(&event, &response);
                response
            }
            Err(RelayError::BackendError(message)) => {
                warn!(%message, "backend returned an error, surfacing without retry");
                RelayResponse {
                    text: message,
                    ..Default::default()
                }
            }
            Err(error) => {
                error!(%error, "backend unreachable after retry, surfacing fallback");
                RelayResponse {
                    text: self.settings.fallback_message.clone(),
                    ..Default::default()
                }
            }
        };

        self.deliver_response(&event.channel, response).await;
    }

    /// One bounded retry for transport-level faults; structured backend
    /// errors pass straight through.
    async fn relay_with_retry(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        match self.relay.relay(request.clone()).await {
            Err(error) if error.is_retryable() => {
                debug!(%error, delay = ?self.settings.relay_retry_delay, "relay failed, retrying once");
                time::sleep(self.settings.relay_retry_delay).await;
                self.relay.relay(request).await
            }
            result => result,
        }
    }

    async fn deliver_response(&self, channel: &ChannelId, response: RelayResponse) {
        // The relay call may have outlived the connection; a response with
        // nowhere valid to go is discarded.
        if self.supervisor.state() != ConnectionState::Active {
            debug!("connection no longer active, discarding response");
            return;
        }
        let text = narration::strip_narration(&response.text);
        for chunk in narration::chunks(&text, self.settings.max_message_len) {
            self.supervisor
                .deliver(OutboundFrame::Text {
                    channel: channel.clone(),
                    content: chunk,
                })
                .await;
        }
        if let Some(audio) = response.audio {
            self.supervisor
                .deliver(OutboundFrame::Audio {
                    channel: channel.clone(),
                    audio,
                })
                .await;
        }
        if let Some(payload) = response.directives {
            self.supervisor
                .deliver(OutboundFrame::Directives {
                    channel: channel.clone(),
                    payload,
                })
                .await;
        }
    }

    fn record_exchange(&self, event: &InboundEvent, response: &RelayResponse) {
        let user_text = match &event.payload {
            EventPayload::Text(text) => Some(text.clone()),
            EventPayload::Audio(_) => response.transcript.clone(),
            EventPayload::Command(_) => None,
        };
        if let Some(text) = user_text {
            self.history.push(&event.channel, ConversationTurn::user(text));
        }
        if !response.text.is_empty() {
            self.history
                .push(&event.channel, ConversationTurn::assistant(response.text.clone()));
        }
    }

    async fn send_presence(&self, channel: &ChannelId) {
        match self.governor.allow(OperationClass::PresenceIndicator) {
            Decision::Proceed => {
                self.supervisor
                    .deliver(OutboundFrame::Presence {
                        channel: channel.clone(),
                    })
                    .await;
            }
            // Queuing a composing indicator is pointless once it is stale;
            // skip it.
            Decision::Defer(delay) => debug!(?delay, "presence indicator deferred, skipping"),
            Decision::Reject { retry_after } => {
                debug!(?retry_after, "presence indicator rejected, skipping");
            }
        }
    }

    async fn handle_command(&self, command: BridgeCommand, channel: &ChannelId) {
        match command {
            BridgeCommand::Join => {
                info!("join requested");
                self.supervisor.connect().await;
            }
            BridgeCommand::Leave => {
                info!("leave requested");
                self.supervisor.disconnect().await;
            }
            BridgeCommand::Status => {
                let status = self.supervisor.status();
                if status.state == ConnectionState::Active {
                    let content = format!(
                        "connection {}, attempts {}/{}",
                        status.state, status.attempts_made, status.max_attempts
                    );
                    self.supervisor
                        .deliver(OutboundFrame::Text {
                            channel: channel.clone(),
                            content,
                        })
                        .await;
                } else {
                    debug!(state = %status.state, "status requested while not active");
                }
            }
        }
    }

    fn addressed(&self, payload: &EventPayload) -> bool {
        if self.settings.wake_words.is_empty() {
            return true;
        }
        match payload {
            EventPayload::Text(text) => {
                let lowered = text.to_lowercase();
                self.settings
                    .wake_words
                    .iter()
                    .any(|word| lowered.contains(word.as_str()))
            }
            // In-call audio is implicitly addressed to the assistant.
            _ => true,
        }
    }
}
