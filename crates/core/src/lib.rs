//! Platform-independent building blocks for the voxbridge session bridge:
//! the inbound event model, conversation windowing, duplicate filtering,
//! quota enforcement, retry accounting, and the reasoning-backend seam.

pub mod backoff;
pub mod dedup;
pub mod event;
pub mod governor;
pub mod history;
pub mod relay;
