//! Bridges the transport's absolute receive counters into per-tick deltas.

use sofa_transport::VideoReceiverStats;

/// Per-interval change in the inbound video counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub nack_count: u64,
    pub retransmissions: u64,
}

/// Turns absolute counter snapshots into deltas against the previous tick.
///
/// The first snapshot after a (re)arm only seeds the baseline. A counter
/// that moves backwards (stack reset, wrap) clamps its delta to zero.
#[derive(Debug, Default)]
pub struct StatsSampler {
    last: Option<VideoReceiverStats>,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one snapshot; returns the delta against the previous one, or
    /// `None` on the baseline-seeding tick.
    pub fn observe(&mut self, snapshot: VideoReceiverStats) -> Option<StatsDelta> {
        let delta = self.last.map(|prev| StatsDelta {
            packets_received: snapshot
                .packets_received
                .saturating_sub(prev.packets_received),
            packets_lost: snapshot.packets_lost.saturating_sub(prev.packets_lost),
            nack_count: snapshot.nack_count.saturating_sub(prev.nack_count),
            retransmissions: snapshot
                .retransmissions
                .saturating_sub(prev.retransmissions),
        });
        self.last = Some(snapshot);
        delta
    }

    /// Forget the baseline. Called on every track attachment so stale
    /// baselines never survive a reconnect.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(received: u64, lost: u64, nacks: u64, retrans: u64) -> VideoReceiverStats {
        VideoReceiverStats {
            packets_received: received,
            packets_lost: lost,
            nack_count: nacks,
            retransmissions: retrans,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_tick_only_seeds_baseline() {
        let mut sampler = StatsSampler::new();
        assert_eq!(sampler.observe(snapshot(100, 2, 1, 0)), None);
    }

    #[test]
    fn test_second_tick_yields_deltas() {
        let mut sampler = StatsSampler::new();
        sampler.observe(snapshot(100, 2, 1, 0));
        let delta = sampler.observe(snapshot(160, 5, 1, 3)).unwrap();
        assert_eq!(
            delta,
            StatsDelta {
                packets_received: 60,
                packets_lost: 3,
                nack_count: 0,
                retransmissions: 3,
            }
        );
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        let mut sampler = StatsSampler::new();
        sampler.observe(snapshot(1000, 50, 9, 9));
        let delta = sampler.observe(snapshot(10, 0, 0, 0)).unwrap();
        assert_eq!(delta, StatsDelta::default());
    }

    #[test]
    fn test_reset_forgets_baseline() {
        let mut sampler = StatsSampler::new();
        sampler.observe(snapshot(100, 0, 0, 0));
        sampler.reset();
        assert_eq!(sampler.observe(snapshot(400, 0, 0, 0)), None);
    }
}
