//! Guest-side control plane of a Sofa remote-play link.
//!
//! The guest negotiates a receive-only audio/video stream plus an "input"
//! data channel with a remote host through a WebSocket signaling relay,
//! keeps receive-side buffering matched to observed network quality, and
//! forwards gamepad state with change suppression.

#![forbid(unsafe_code)]

pub mod config;
pub mod input;
pub mod jitter;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod storage;

pub use config::GuestConfig;
pub use session::{Guest, SessionEnd, SessionOutcome, SessionState};
