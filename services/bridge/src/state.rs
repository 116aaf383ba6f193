//! Shared Application State
//!
//! The `AppState` struct holds the handles the HTTP surface needs: the
//! supervisor (for status reads) and the inbound queue (for webhook ingress).

use crate::supervisor::SupervisorHandle;
use tokio::sync::mpsc;
use voxbridge_core::event::InboundEvent;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: SupervisorHandle,
    pub inbound_tx: mpsc::Sender<InboundEvent>,
}
