//! Capability interface over the real-time transport.
//!
//! The guest control plane never touches the media stack directly. It drives
//! whatever transport it is given through the narrow traits in this crate:
//! offer/answer negotiation, candidate exchange, an auxiliary "input"
//! channel, a receive-side statistics snapshot, and (when the stack has one)
//! a writable buffer-depth control point. Transport-side happenings come
//! back as [`TransportEvent`] values on a channel, so the session loop stays
//! a single sequential timeline.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use tokio::sync::mpsc;

use sofa_common::{IceCandidate, Result};

mod null;

pub use null::NullTransport;

/// Kind of a received media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Event emitted by a transport toward the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local connectivity candidate is ready to be relayed to the peer.
    LocalCandidate(IceCandidate),

    /// First media arrived on a receive track. `frame_rate` is the
    /// negotiated/estimated rate if the stack reports one.
    TrackAttached {
        kind: MediaKind,
        frame_rate: Option<f64>,
    },

    /// The stack re-estimated a track's frame rate.
    FrameRateChanged { kind: MediaKind, frame_rate: f64 },

    /// The auxiliary input channel is open and writable.
    InputOpen,

    /// The auxiliary input channel closed.
    InputClosed,

    /// Text payload received on the auxiliary input channel.
    InputMessage(String),

    /// Observational connection/ICE state change. Logged by the session,
    /// never drives its state machine.
    ConnectionState(String),
}

/// Absolute receive-side counters for the inbound video stream.
///
/// These are raw totals as reported by the stack; the stats sampler turns
/// them into per-tick deltas. Counters a given stack does not measure are
/// reported as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoReceiverStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub nack_count: u64,
    pub retransmissions: u64,
    pub frames_decoded: u64,
    /// Cumulative jitter-buffer delay in seconds, for diagnostics.
    pub jitter_buffer_delay_s: f64,
    /// Frames emitted from the jitter buffer, for diagnostics.
    pub jitter_buffer_emitted: u64,
    /// Wall-clock timestamp of this snapshot in epoch milliseconds.
    pub timestamp_ms: f64,
}

/// The channel-send capability the input streamer depends on.
#[async_trait]
pub trait InputSink: Send + Sync {
    /// Whether the auxiliary channel currently reports an open/ready state.
    fn is_open(&self) -> bool;

    /// Send a text payload. Delivery is best-effort; loss is acceptable.
    async fn send_text(&self, text: &str) -> Result<()>;
}

/// Writable receive-side buffer-depth control point.
pub trait PlayoutControl: Send + Sync {
    /// Request `seconds` of receive-side buffering. Returns `false` when the
    /// transport exposes no such control point; callers log and defer.
    fn set_playout_target(&self, seconds: f64) -> bool;
}

/// One negotiated real-time link.
///
/// A transport instance belongs to exactly one session and is never reused
/// across reconnects; a fresh one is created per connect attempt.
#[async_trait]
pub trait Transport: InputSink + PlayoutControl {
    /// Request a recvonly video track, a recvonly audio track and the
    /// bidirectional "input" channel, then produce and locally apply a
    /// session offer. Returns the offer SDP to relay to the host.
    async fn start_negotiation(&self) -> Result<String>;

    /// Apply the host's answer as the remote description.
    async fn accept_answer(&self, sdp: &str) -> Result<()>;

    /// Apply one remote connectivity candidate. Callers queue candidates
    /// that arrive before the remote description.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Snapshot of the inbound video counters, if an inbound video report
    /// is currently available.
    async fn video_stats(&self) -> Option<VideoReceiverStats>;

    /// Stop all tracks, close the auxiliary channel, release the link.
    async fn close(&self);
}

/// Builds one fresh transport per connect attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, events: mpsc::Sender<TransportEvent>) -> Result<Box<dyn Transport>>;
}
