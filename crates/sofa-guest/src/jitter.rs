//! Adaptive receive-side buffering and stall detection.
//!
//! The controller trades latency against resilience: it keeps a dynamic
//! frame count between a hard floor and the user's baseline plus a little
//! headroom, stepping at most one frame per stats tick. The freeze detector
//! watches the decoded-frame rate and declares the stream dead after enough
//! consecutive near-zero ticks.

use tracing::debug;

use crate::stats::StatsDelta;

/// Hard floor for the dynamic frame count.
pub const MIN_VIDEO_QUEUE_FRAMES: u32 = 1;

/// Frame-rate estimate used until a track reports one.
pub const DEFAULT_FRAME_RATE: f64 = 60.0;

/// Thresholds for buffer adaptation and freeze detection.
///
/// None of these have a derivation beyond field tuning, so they stay
/// configurable rather than hard-coded.
#[derive(Debug, Clone, Copy)]
pub struct JitterTuning {
    /// Loss rate above which the buffer grows.
    pub grow_loss_rate: f64,
    /// Loss rate below which the buffer may shrink.
    pub shrink_loss_rate: f64,
    /// Per-tick NACK count above which the buffer grows.
    pub grow_nack_delta: u64,
    /// Per-tick retransmission count above which the buffer grows.
    pub grow_retrans_delta: u64,
    /// Per-tick retransmission count below which the buffer may shrink.
    pub shrink_retrans_delta: u64,
    /// Frames allowed above the configured baseline.
    pub headroom_frames: u32,
    /// Minimum frame-rate change that triggers a target recompute.
    pub frame_rate_epsilon: f64,
    /// Decoded fps below this counts as a frozen tick.
    pub freeze_fps_threshold: f64,
    /// Consecutive frozen ticks before the stream is declared dead.
    pub freeze_tick_limit: u32,
}

impl Default for JitterTuning {
    fn default() -> Self {
        Self {
            grow_loss_rate: 0.02,
            shrink_loss_rate: 0.005,
            grow_nack_delta: 10,
            grow_retrans_delta: 20,
            shrink_retrans_delta: 5,
            headroom_frames: 2,
            frame_rate_epsilon: 0.25,
            freeze_fps_threshold: 0.5,
            freeze_tick_limit: 5,
        }
    }
}

/// Keeps the receive-side buffering depth matched to observed quality.
///
/// Owns its state exclusively; mutation happens only through these methods.
/// Methods that change the effective target return the new target in
/// seconds so the caller can push it to the transport's control point.
#[derive(Debug)]
pub struct JitterBufferController {
    tuning: JitterTuning,
    configured_frames: u32,
    dynamic_frames: u32,
    frame_rate: f64,
}

impl JitterBufferController {
    pub fn new(configured_frames: u32, tuning: JitterTuning) -> Self {
        let configured_frames = configured_frames.max(MIN_VIDEO_QUEUE_FRAMES);
        Self {
            tuning,
            configured_frames,
            dynamic_frames: configured_frames,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    pub fn configured_frames(&self) -> u32 {
        self.configured_frames
    }

    pub fn dynamic_frames(&self) -> u32 {
        self.dynamic_frames
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Effective buffering target in seconds.
    pub fn target_seconds(&self) -> f64 {
        f64::from(self.dynamic_frames) / self.frame_rate
    }

    fn ceiling(&self) -> u32 {
        self.configured_frames + self.tuning.headroom_frames
    }

    /// Replace the user baseline; clamps the dynamic depth to the new
    /// bounds and returns the target to re-apply.
    pub fn set_baseline(&mut self, frames: u32) -> f64 {
        self.configured_frames = frames.max(MIN_VIDEO_QUEUE_FRAMES);
        self.dynamic_frames = self
            .dynamic_frames
            .clamp(MIN_VIDEO_QUEUE_FRAMES, self.ceiling());
        self.target_seconds()
    }

    /// A receive track just attached. Adopts its reported frame rate (or
    /// the default when absent/non-positive), resets the dynamic depth to
    /// the baseline and returns the target to apply.
    pub fn on_track_attached(&mut self, frame_rate: Option<f64>) -> f64 {
        self.frame_rate = frame_rate
            .filter(|rate| *rate > 0.0)
            .unwrap_or(DEFAULT_FRAME_RATE);
        self.dynamic_frames = self.configured_frames;
        self.target_seconds()
    }

    /// The track's frame rate was re-estimated. Returns the target to
    /// re-apply when the change is significant; the frame count is kept.
    pub fn on_frame_rate_changed(&mut self, frame_rate: f64) -> Option<f64> {
        if frame_rate <= 0.0 {
            return None;
        }
        if (frame_rate - self.frame_rate).abs() < self.tuning.frame_rate_epsilon {
            return None;
        }
        self.frame_rate = frame_rate;
        Some(self.target_seconds())
    }

    /// Feed one tick of transport deltas. Moves the dynamic depth by at
    /// most one frame and returns the new target only when it changed.
    pub fn on_stats_tick(&mut self, delta: &StatsDelta) -> Option<f64> {
        let observed = delta.packets_received + delta.packets_lost;
        let loss_rate = if observed > 0 {
            Some(delta.packets_lost as f64 / observed as f64)
        } else {
            None
        };

        let grow = loss_rate.map_or(true, |rate| rate > self.tuning.grow_loss_rate)
            || delta.nack_count > self.tuning.grow_nack_delta
            || delta.retransmissions > self.tuning.grow_retrans_delta;
        let shrink = loss_rate.is_some_and(|rate| rate < self.tuning.shrink_loss_rate)
            && delta.nack_count == 0
            && delta.retransmissions < self.tuning.shrink_retrans_delta;

        let next = if grow {
            (self.dynamic_frames + 1).min(self.ceiling())
        } else if shrink {
            (self.dynamic_frames - 1).max(MIN_VIDEO_QUEUE_FRAMES)
        } else {
            self.dynamic_frames
        };

        if next == self.dynamic_frames {
            return None;
        }
        debug!(
            "jitter buffer {} -> {} frames (loss={:?} nacks={} retrans={})",
            self.dynamic_frames, next, loss_rate, delta.nack_count, delta.retransmissions
        );
        self.dynamic_frames = next;
        Some(self.target_seconds())
    }
}

/// Declares the stream frozen after enough consecutive low-fps ticks.
///
/// Latched: it fires exactly once per arm and stays quiet until reset.
#[derive(Debug)]
pub struct FreezeDetector {
    fps_threshold: f64,
    tick_limit: u32,
    last_sample: Option<(u64, f64)>,
    low_ticks: u32,
    tripped: bool,
}

impl FreezeDetector {
    pub fn new(tuning: &JitterTuning) -> Self {
        Self {
            fps_threshold: tuning.freeze_fps_threshold,
            tick_limit: tuning.freeze_tick_limit,
            last_sample: None,
            low_ticks: 0,
            tripped: false,
        }
    }

    /// Feed one `(frames_decoded, timestamp_ms)` sample. Returns `true`
    /// exactly once, on the tick that crosses the limit.
    pub fn observe(&mut self, frames_decoded: u64, timestamp_ms: f64) -> bool {
        if self.tripped {
            return false;
        }

        if let Some((last_frames, last_ms)) = self.last_sample {
            if timestamp_ms > last_ms {
                match frames_decoded.checked_sub(last_frames) {
                    Some(delta_frames) => {
                        let fps = delta_frames as f64 * 1000.0 / (timestamp_ms - last_ms);
                        if fps < self.fps_threshold {
                            self.low_ticks += 1;
                        } else {
                            self.low_ticks = 0;
                        }
                    }
                    // Decoder counter went backwards; treat as a fresh start.
                    None => self.low_ticks = 0,
                }
            }
        }
        self.last_sample = Some((frames_decoded, timestamp_ms));

        if self.low_ticks >= self.tick_limit {
            self.tripped = true;
            return true;
        }
        false
    }

    /// Re-arm for a fresh track.
    pub fn reset(&mut self) {
        self.last_sample = None;
        self.low_ticks = 0;
        self.tripped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(received: u64, lost: u64, nacks: u64, retrans: u64) -> StatsDelta {
        StatsDelta {
            packets_received: received,
            packets_lost: lost,
            nack_count: nacks,
            retransmissions: retrans,
        }
    }

    fn controller(frames: u32) -> JitterBufferController {
        let mut controller = JitterBufferController::new(frames, JitterTuning::default());
        controller.on_track_attached(Some(60.0));
        controller
    }

    #[test]
    fn test_initial_target_matches_baseline_over_frame_rate() {
        let controller = controller(4);
        assert!((controller.target_seconds() - 4.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_loss_grows_then_clean_tick_shrinks() {
        let mut controller = controller(4);

        // 5% loss grows to 5 frames.
        let target = controller.on_stats_tick(&delta(95, 5, 0, 0)).unwrap();
        assert_eq!(controller.dynamic_frames(), 5);
        assert!((target - 5.0 / 60.0).abs() < 1e-9);

        // A clean tick shrinks back to 4.
        let target = controller.on_stats_tick(&delta(100, 0, 0, 0)).unwrap();
        assert_eq!(controller.dynamic_frames(), 4);
        assert!((target - 4.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_step_per_tick_and_ceiling() {
        let mut controller = controller(2);
        for _ in 0..10 {
            controller.on_stats_tick(&delta(50, 50, 0, 0));
        }
        // Never above configured + headroom no matter how bad it gets.
        assert_eq!(controller.dynamic_frames(), 4);
    }

    #[test]
    fn test_floor_is_one_frame() {
        let mut controller = controller(1);
        for _ in 0..10 {
            controller.on_stats_tick(&delta(100, 0, 0, 0));
        }
        assert_eq!(controller.dynamic_frames(), 1);
    }

    #[test]
    fn test_undefined_loss_rate_grows() {
        let mut controller = controller(4);
        let target = controller.on_stats_tick(&delta(0, 0, 0, 0));
        assert_eq!(controller.dynamic_frames(), 5);
        assert!(target.is_some());
    }

    #[test]
    fn test_nack_and_retrans_thresholds_grow() {
        let mut controller = controller(4);
        controller.on_stats_tick(&delta(1000, 0, 11, 0));
        assert_eq!(controller.dynamic_frames(), 5);

        let mut controller = controller(4);
        controller.on_stats_tick(&delta(1000, 0, 0, 21));
        assert_eq!(controller.dynamic_frames(), 5);
    }

    #[test]
    fn test_middling_tick_holds() {
        let mut controller = controller(4);
        // 1% loss: neither growth (>2%) nor shrink (<0.5%).
        assert!(controller.on_stats_tick(&delta(990, 10, 0, 0)).is_none());
        assert_eq!(controller.dynamic_frames(), 4);

        // Clean loss but a few retransmissions block the shrink.
        assert!(controller.on_stats_tick(&delta(1000, 0, 0, 5)).is_none());
        assert_eq!(controller.dynamic_frames(), 4);
    }

    #[test]
    fn test_unchanged_depth_returns_no_target() {
        let mut controller = controller(1);
        assert!(controller.on_stats_tick(&delta(100, 0, 0, 0)).is_none());
    }

    #[test]
    fn test_dynamic_frames_stay_bounded_for_any_sequence() {
        let mut controller = controller(3);
        let ticks = [
            delta(0, 0, 0, 0),
            delta(10, 90, 50, 50),
            delta(100, 0, 0, 0),
            delta(100, 0, 0, 0),
            delta(100, 0, 0, 0),
            delta(100, 0, 0, 0),
            delta(0, 0, 0, 0),
            delta(500, 1, 0, 0),
        ];
        for tick in ticks.iter().cycle().take(200) {
            controller.on_stats_tick(tick);
            assert!(controller.dynamic_frames() >= 1);
            assert!(controller.dynamic_frames() <= controller.configured_frames() + 2);
        }
    }

    #[test]
    fn test_set_baseline_clamps_dynamic_depth() {
        let mut controller = controller(6);
        // Push dynamic depth to 8.
        for _ in 0..2 {
            controller.on_stats_tick(&delta(0, 0, 0, 0));
        }
        assert_eq!(controller.dynamic_frames(), 8);

        controller.set_baseline(2);
        assert_eq!(controller.configured_frames(), 2);
        assert_eq!(controller.dynamic_frames(), 4);

        controller.set_baseline(0);
        assert_eq!(controller.configured_frames(), 1);
    }

    #[test]
    fn test_track_attached_resets_depth_and_adopts_rate() {
        let mut controller = controller(4);
        controller.on_stats_tick(&delta(0, 0, 0, 0));
        assert_eq!(controller.dynamic_frames(), 5);

        let target = controller.on_track_attached(Some(30.0));
        assert_eq!(controller.dynamic_frames(), 4);
        assert!((target - 4.0 / 30.0).abs() < 1e-9);

        // Absent or bogus rates fall back to the default.
        controller.on_track_attached(None);
        assert!((controller.frame_rate() - DEFAULT_FRAME_RATE).abs() < 1e-9);
        controller.on_track_attached(Some(0.0));
        assert!((controller.frame_rate() - DEFAULT_FRAME_RATE).abs() < 1e-9);
    }

    #[test]
    fn test_frame_rate_change_needs_quarter_fps() {
        let mut controller = controller(4);
        assert!(controller.on_frame_rate_changed(60.1).is_none());
        assert!((controller.frame_rate() - 60.0).abs() < 1e-9);

        let target = controller.on_frame_rate_changed(30.0).unwrap();
        assert!((target - 4.0 / 30.0).abs() < 1e-9);
        assert_eq!(controller.dynamic_frames(), 4);

        assert!(controller.on_frame_rate_changed(-1.0).is_none());
    }

    fn tuning() -> JitterTuning {
        JitterTuning::default()
    }

    #[test]
    fn test_freeze_needs_five_consecutive_low_ticks() {
        let mut freeze = FreezeDetector::new(&tuning());
        // Healthy stream at 60 fps.
        assert!(!freeze.observe(0, 0.0));
        for tick in 1..=3 {
            assert!(!freeze.observe(tick * 60, tick as f64 * 1000.0));
        }
        // Decoder stops: frames stay flat.
        for tick in 4..=7 {
            assert!(!freeze.observe(180, tick as f64 * 1000.0));
        }
        assert!(freeze.observe(180, 8000.0));
    }

    #[test]
    fn test_freeze_fires_once_then_stays_quiet() {
        let mut freeze = FreezeDetector::new(&tuning());
        freeze.observe(100, 0.0);
        let mut fired = 0;
        for tick in 1..=10 {
            if freeze.observe(100, tick as f64 * 1000.0) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_healthy_tick_resets_freeze_count() {
        let mut freeze = FreezeDetector::new(&tuning());
        freeze.observe(0, 0.0);
        for tick in 1..=4 {
            assert!(!freeze.observe(0, tick as f64 * 1000.0));
        }
        // Decoder catches up; the streak restarts from zero.
        assert!(!freeze.observe(120, 5000.0));
        for tick in 6..=9 {
            assert!(!freeze.observe(120, tick as f64 * 1000.0));
        }
        // Fifth consecutive low tick after the recovery.
        assert!(freeze.observe(120, 10_000.0));
    }

    #[test]
    fn test_freeze_ignores_stale_timestamps() {
        let mut freeze = FreezeDetector::new(&tuning());
        freeze.observe(100, 1000.0);
        // Same timestamp: no fps sample, no streak advance.
        for _ in 0..10 {
            assert!(!freeze.observe(100, 1000.0));
        }
    }

    #[test]
    fn test_freeze_reset_rearms() {
        let mut freeze = FreezeDetector::new(&tuning());
        freeze.observe(0, 0.0);
        for tick in 1..=5 {
            freeze.observe(0, tick as f64 * 1000.0);
        }
        freeze.reset();
        assert!(!freeze.observe(0, 10_000.0));
        assert!(!freeze.observe(60, 11_000.0));
    }
}
