//! Inert transport for wiring tests and degraded runs.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use sofa_common::{IceCandidate, Result};

use crate::{InputSink, PlayoutControl, Transport, TransportEvent, VideoReceiverStats};

/// A transport that negotiates nothing and carries nothing.
///
/// It produces a placeholder offer, accepts whatever it is given and exposes
/// no media, no stats and no buffer-depth control point. Useful for driving
/// the control plane without a host on the other end.
pub struct NullTransport {
    _events: mpsc::Sender<TransportEvent>,
}

impl NullTransport {
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self { _events: events }
    }
}

#[async_trait]
impl InputSink for NullTransport {
    fn is_open(&self) -> bool {
        false
    }

    async fn send_text(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

impl PlayoutControl for NullTransport {
    fn set_playout_target(&self, _seconds: f64) -> bool {
        false
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn start_negotiation(&self) -> Result<String> {
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string())
    }

    async fn accept_answer(&self, _sdp: &str) -> Result<()> {
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        debug!("null transport dropping candidate {}", candidate.candidate);
        Ok(())
    }

    async fn video_stats(&self) -> Option<VideoReceiverStats> {
        None
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_transport_negotiates_and_exposes_nothing() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = NullTransport::new(tx);

        let offer = transport.start_negotiation().await.unwrap();
        assert!(offer.starts_with("v=0"));
        transport.accept_answer("v=0").await.unwrap();

        assert!(!transport.is_open());
        assert!(!transport.set_playout_target(0.1));
        assert!(transport.video_stats().await.is_none());
    }
}
