//! Lifecycle supervision for the realtime platform connection.
//!
//! One supervisor task owns one connection: its state, its retry budget, and
//! the transport handle. Everything else talks to it through commands and
//! reads it through a watch snapshot.

use crate::transport::{Connection, ConnectionEvent, Transport, TransportError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{Instrument, debug, error, info, info_span, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use voxbridge_core::backoff::{BackoffSchedule, RetryBudget};
use voxbridge_core::event::{InboundEvent, OutboundFrame};

/// Lifecycle states for a supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Handshake succeeded; waiting out the settle timer before trusting
    /// the connection. No traffic is relayed in this state.
    Stabilizing,
    Active,
    /// Keepalive or transport failure; one reconnection cycle follows.
    Degraded,
    Closing,
    /// Retry budget exhausted. Requires a fresh connect request.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Stabilizing => "stabilizing",
            ConnectionState::Active => "active",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Requests accepted by the supervisor task.
#[derive(Debug)]
pub enum Command {
    Connect,
    Disconnect,
    Deliver(OutboundFrame),
}

/// Snapshot published after every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub connect_timeout: Duration,
    pub settle: Duration,
    pub keepalive_interval: Duration,
    pub probe_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffSchedule,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            settle: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            max_attempts: voxbridge_core::backoff::DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffSchedule::default(),
        }
    }
}

/// Cloneable handle for issuing commands and reading connection status.
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl SupervisorHandle {
    pub async fn connect(&self) {
        self.send(Command::Connect).await;
    }

    pub async fn disconnect(&self) {
        self.send(Command::Disconnect).await;
    }

    pub async fn deliver(&self, frame: OutboundFrame) {
        self.send(Command::Deliver(frame)).await;
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn status(&self) -> StatusSnapshot {
        *self.status_rx.borrow()
    }

    pub fn status_stream(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    async fn send(&self, command: Command) {
        if self.cmd_tx.send(command).await.is_err() {
            warn!("connection supervisor is gone, command dropped");
        }
    }

    #[cfg(test)]
    pub(crate) fn stub(
        state: ConnectionState,
    ) -> (Self, mpsc::Receiver<Command>, watch::Sender<StatusSnapshot>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot {
            state,
            attempts_made: 0,
            max_attempts: 3,
        });
        (Self { cmd_tx, status_rx }, cmd_rx, status_tx)
    }
}

/// Spawns the supervisor task for one managed connection.
///
/// Inbound events read off the live connection are forwarded into
/// `inbound_tx`, the orchestrator's bounded queue.
pub fn spawn(
    transport: Arc<dyn Transport>,
    settings: SupervisorSettings,
    inbound_tx: mpsc::Sender<InboundEvent>,
) -> (SupervisorHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let initial = StatusSnapshot {
        state: ConnectionState::Disconnected,
        attempts_made: 0,
        max_attempts: settings.max_attempts,
    };
    let (status_tx, status_rx) = watch::channel(initial);

    let budget = RetryBudget::new(settings.max_attempts);
    let supervisor = Supervisor {
        transport,
        settings,
        budget,
        cmd_rx,
        status_tx,
        inbound_tx,
    };
    let connection_id = Uuid::new_v4();
    let task = tokio::spawn(
        supervisor
            .run()
            .instrument(info_span!("connection", id = %connection_id)),
    );
    (SupervisorHandle { cmd_tx, status_rx }, task)
}

enum Establish {
    Connected(Box<dyn Connection>),
    Failed,
    Cancelled,
}

enum Stabilize {
    Settled(Box<dyn Connection>),
    TornDown,
    Cancelled,
}

enum Run {
    Degraded,
    Stopped,
}

enum EstablishWake {
    Cmd(Option<Command>),
    Handshake(Result<Result<Box<dyn Connection>, TransportError>, time::error::Elapsed>),
}

enum BackoffWake {
    Cmd(Option<Command>),
    Done,
}

enum StabilizeWake {
    Settled,
    Event(Option<ConnectionEvent>),
    Cmd(Option<Command>),
}

enum ActiveWake {
    Cmd(Option<Command>),
    Event(Option<ConnectionEvent>),
    KeepaliveDue,
}

struct Supervisor {
    transport: Arc<dyn Transport>,
    settings: SupervisorSettings,
    budget: RetryBudget,
    cmd_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<StatusSnapshot>,
    inbound_tx: mpsc::Sender<InboundEvent>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            let Some(command) = self.cmd_rx.recv().await else {
                break;
            };
            match command {
                Command::Connect => {
                    // Each arrival in Active earns a fresh budget, so a
                    // degraded connection gets one full reconnection cycle.
                    loop {
                        self.budget.reset();
                        match self.establish().await {
                            Establish::Connected(conn) => match self.run_active(conn).await {
                                Run::Degraded => continue,
                                Run::Stopped => break,
                            },
                            Establish::Failed | Establish::Cancelled => break,
                        }
                    }
                }
                Command::Disconnect => {
                    if self.status_tx.borrow().state != ConnectionState::Disconnected {
                        self.close(None).await;
                    }
                }
                Command::Deliver(_) => {
                    debug!("dropping outbound frame while disconnected");
                }
            }
        }
        debug!("supervisor handle dropped, task exiting");
    }

    async fn establish(&mut self) -> Establish {
        loop {
            self.set_state(ConnectionState::Connecting);
            let transport = self.transport.clone();
            let connect = time::timeout(self.settings.connect_timeout, transport.connect());
            tokio::pin!(connect);

            let handshake = loop {
                let wake = tokio::select! {
                    cmd = self.cmd_rx.recv() => EstablishWake::Cmd(cmd),
                    result = &mut connect => EstablishWake::Handshake(result),
                };
                match wake {
                    EstablishWake::Cmd(Some(Command::Disconnect)) | EstablishWake::Cmd(None) => {
                        // Cancel in place; the in-flight handshake is dropped.
                        self.close(None).await;
                        return Establish::Cancelled;
                    }
                    EstablishWake::Cmd(Some(Command::Connect)) => {
                        debug!("connect already in progress");
                    }
                    EstablishWake::Cmd(Some(Command::Deliver(_))) => {
                        debug!("dropping outbound frame while not active");
                    }
                    EstablishWake::Handshake(result) => break result,
                }
            };

            match handshake {
                Ok(Ok(conn)) => match self.stabilize(conn).await {
                    Stabilize::Settled(conn) => {
                        self.budget.reset();
                        self.set_state(ConnectionState::Active);
                        info!("connection active");
                        return Establish::Connected(conn);
                    }
                    Stabilize::TornDown => {}
                    Stabilize::Cancelled => return Establish::Cancelled,
                },
                Ok(Err(error)) => warn!(%error, "handshake failed"),
                Err(_) => warn!(
                    timeout = ?self.settings.connect_timeout,
                    "connect attempt timed out"
                ),
            }

            self.budget.record_attempt();
            if self.budget.exhausted() {
                error!(
                    attempts = self.budget.attempts_made,
                    "connection retry budget exhausted"
                );
                self.set_state(ConnectionState::Failed);
                return Establish::Failed;
            }

            let delay = self.settings.backoff.delay_after(self.budget.attempts_made);
            debug!(?delay, attempt = self.budget.attempts_made, "backing off before retry");
            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                let wake = tokio::select! {
                    cmd = self.cmd_rx.recv() => BackoffWake::Cmd(cmd),
                    _ = &mut sleep => BackoffWake::Done,
                };
                match wake {
                    BackoffWake::Cmd(Some(Command::Disconnect)) | BackoffWake::Cmd(None) => {
                        self.close(None).await;
                        return Establish::Cancelled;
                    }
                    BackoffWake::Cmd(Some(Command::Connect)) => {
                        debug!("connect already in progress");
                    }
                    BackoffWake::Cmd(Some(Command::Deliver(_))) => {
                        debug!("dropping outbound frame while not active");
                    }
                    BackoffWake::Done => break,
                }
            }
        }
    }

    /// The platform is observed to tear connections down right after an
    /// apparently successful handshake; nothing is trusted until the settle
    /// timer elapses without a teardown signal.
    async fn stabilize(&mut self, mut conn: Box<dyn Connection>) -> Stabilize {
        self.set_state(ConnectionState::Stabilizing);
        let settle = time::sleep(self.settings.settle);
        tokio::pin!(settle);
        loop {
            let wake = tokio::select! {
                _ = &mut settle => StabilizeWake::Settled,
                event = conn.recv() => StabilizeWake::Event(event),
                cmd = self.cmd_rx.recv() => StabilizeWake::Cmd(cmd),
            };
            match wake {
                StabilizeWake::Settled => return Stabilize::Settled(conn),
                StabilizeWake::Event(Some(ConnectionEvent::Inbound(event))) => {
                    self.forward(event).await;
                }
                StabilizeWake::Event(Some(ConnectionEvent::Closed))
                | StabilizeWake::Event(None) => {
                    warn!("connection torn down during stabilization");
                    conn.shutdown().await;
                    return Stabilize::TornDown;
                }
                StabilizeWake::Cmd(Some(Command::Disconnect)) | StabilizeWake::Cmd(None) => {
                    self.close(Some(conn)).await;
                    return Stabilize::Cancelled;
                }
                StabilizeWake::Cmd(Some(Command::Connect)) => {
                    debug!("connect already in progress");
                }
                StabilizeWake::Cmd(Some(Command::Deliver(_))) => {
                    debug!("dropping outbound frame while not active");
                }
            }
        }
    }

    async fn run_active(&mut self, mut conn: Box<dyn Connection>) -> Run {
        let mut keepalive = time::interval_at(
            time::Instant::now() + self.settings.keepalive_interval,
            self.settings.keepalive_interval,
        );
        loop {
            let wake = tokio::select! {
                cmd = self.cmd_rx.recv() => ActiveWake::Cmd(cmd),
                event = conn.recv() => ActiveWake::Event(event),
                _ = keepalive.tick() => ActiveWake::KeepaliveDue,
            };
            match wake {
                ActiveWake::Cmd(Some(Command::Disconnect)) | ActiveWake::Cmd(None) => {
                    self.close(Some(conn)).await;
                    return Run::Stopped;
                }
                ActiveWake::Cmd(Some(Command::Connect)) => {
                    debug!("connect requested while already active");
                }
                ActiveWake::Cmd(Some(Command::Deliver(frame))) => {
                    if let Err(error) = conn.deliver(frame).await {
                        warn!(%error, "frame delivery failed");
                        return self.degrade(conn).await;
                    }
                }
                ActiveWake::Event(Some(ConnectionEvent::Inbound(event))) => {
                    self.forward(event).await;
                }
                ActiveWake::Event(Some(ConnectionEvent::Closed)) | ActiveWake::Event(None) => {
                    warn!("transport closed unexpectedly");
                    return self.degrade(conn).await;
                }
                ActiveWake::KeepaliveDue => {
                    match time::timeout(self.settings.probe_timeout, conn.probe()).await {
                        Ok(Ok(())) => debug!("keepalive probe acknowledged"),
                        Ok(Err(error)) => {
                            warn!(%error, "keepalive probe failed");
                            return self.degrade(conn).await;
                        }
                        Err(_) => {
                            warn!("keepalive probe timed out");
                            return self.degrade(conn).await;
                        }
                    }
                }
            }
        }
    }

    async fn degrade(&mut self, mut conn: Box<dyn Connection>) -> Run {
        self.set_state(ConnectionState::Degraded);
        conn.shutdown().await;
        Run::Degraded
    }

    /// Transport resources are released before Disconnected is reported,
    /// whatever state the disconnect arrived in.
    async fn close(&mut self, conn: Option<Box<dyn Connection>>) {
        self.set_state(ConnectionState::Closing);
        if let Some(mut conn) = conn {
            conn.shutdown().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn forward(&self, event: InboundEvent) {
        if self.inbound_tx.send(event).await.is_err() {
            warn!("inbound queue closed, dropping event");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "connection state changed");
        let _ = self.status_tx.send(StatusSnapshot {
            state,
            attempts_made: self.budget.attempts_made,
            max_attempts: self.budget.max_attempts,
        });
    }
}
