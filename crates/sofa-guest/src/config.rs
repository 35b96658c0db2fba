use std::time::Duration;

use crate::jitter::JitterTuning;

pub const DEFAULT_VIDEO_QUEUE_FRAMES: u32 = 4;
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_INPUT_POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_RECONNECTS: u32 = 1;

/// Everything one session needs to run.
#[derive(Debug, Clone)]
pub struct GuestConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: String,
    /// Display name announced to the host right after the channel opens.
    pub guest_name: Option<String>,
    /// Preferred input device index; lowest connected index when absent.
    pub gamepad_index: Option<usize>,
    /// User-set baseline jitter-buffer depth in frames, >= 1.
    pub video_queue_frames: u32,
    pub tuning: JitterTuning,
    pub stats_interval: Duration,
    pub input_poll_interval: Duration,
}

impl GuestConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            guest_name: None,
            gamepad_index: None,
            video_queue_frames: DEFAULT_VIDEO_QUEUE_FRAMES,
            tuning: JitterTuning::default(),
            stats_interval: Duration::from_millis(DEFAULT_STATS_INTERVAL_MS),
            input_poll_interval: Duration::from_millis(DEFAULT_INPUT_POLL_INTERVAL_MS),
        }
    }
}

/// Reconnect policy applied after a previously established session drops.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECTS,
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

/// The startup parameter wins over the persisted value; both fall back to
/// the default, and anything below one frame is brought back up to one.
pub fn resolve_queue_frames(startup: Option<u32>, persisted: Option<u32>) -> u32 {
    startup
        .or(persisted)
        .unwrap_or(DEFAULT_VIDEO_QUEUE_FRAMES)
        .max(1)
}
