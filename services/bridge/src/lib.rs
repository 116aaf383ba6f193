//! voxbridge Bridge Service Library
//!
//! Connection supervision, event orchestration, and the HTTP surface for the
//! voxbridge session bridge. The `bridge` binary is a thin wrapper around
//! this library.

pub mod config;
pub mod handlers;
pub mod narration;
pub mod orchestrator;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod transport;
