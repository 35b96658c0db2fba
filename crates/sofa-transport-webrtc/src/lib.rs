//! WebRTC-backed implementation of the transport capability interface.
//!
//! One `WebRtcTransport` wraps one `RTCPeerConnection` configured the way
//! the guest needs it: a recvonly video transceiver, a recvonly audio
//! transceiver and one bidirectional "input" data channel. Stack callbacks
//! are converted into [`TransportEvent`]s on an mpsc channel so the session
//! loop keeps its single timeline.
//!
//! Two capabilities this stack does not have: it reports no track frame
//! rate (`TrackAttached` carries `None`) and it exposes no writable
//! playout-delay control point (`set_playout_target` returns `false`).

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use sofa_common::helpers::now_ms;
use sofa_common::{Error, IceCandidate, Result};
use sofa_transport::{
    InputSink, MediaKind, PlayoutControl, Transport, TransportEvent, TransportFactory,
    VideoReceiverStats,
};

const EVENT_CHANNEL_DEPTH: usize = 64;

/// Builds one fresh peer connection per connect attempt.
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportFactory {
    /// STUN/TURN server URLs. Empty by default: the relay deployment assumes
    /// host and guest can reach each other with host candidates.
    pub ice_servers: Vec<String>,
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, events: mpsc::Sender<TransportEvent>) -> Result<Box<dyn Transport>> {
        let transport = WebRtcTransport::connect(self.ice_servers.clone(), events).await?;
        Ok(Box::new(transport))
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    input: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    video_frames: Arc<AtomicU64>,
    events: mpsc::Sender<TransportEvent>,
}

impl WebRtcTransport {
    async fn connect(
        ice_urls: Vec<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(Error::transport)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media).map_err(Error::transport)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice_urls.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice_urls,
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(Error::transport)?,
        );

        let video_frames = Arc::new(AtomicU64::new(0));

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx
                            .send(TransportEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }))
                            .await;
                    }
                    Err(err) => warn!("failed to serialize local candidate: {err}"),
                }
            })
        }));

        let tx = events.clone();
        let frames = video_frames.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            let frames = frames.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => MediaKind::Video,
                    _ => MediaKind::Audio,
                };
                // The stack negotiates codecs, not frame rates; the buffer
                // controller falls back to its default estimate.
                let _ = tx
                    .send(TransportEvent::TrackAttached {
                        kind,
                        frame_rate: None,
                    })
                    .await;
                tokio::spawn(drain_track(track, kind, frames));
            })
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx
                    .send(TransportEvent::ConnectionState(format!(
                        "peer connection {state}"
                    )))
                    .await;
            })
        }));

        let tx = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx
                    .send(TransportEvent::ConnectionState(format!("ice {state}")))
                    .await;
            })
        }));

        Ok(Self {
            pc,
            input: Arc::new(Mutex::new(None)),
            video_frames,
            events,
        })
    }

    fn input_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.input.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl InputSink for WebRtcTransport {
    fn is_open(&self) -> bool {
        self.input_channel()
            .map(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        let Some(dc) = self.input_channel() else {
            return Err(Error::transport("input channel not created"));
        };
        dc.send_text(text.to_string())
            .await
            .map_err(Error::transport)?;
        Ok(())
    }
}

impl PlayoutControl for WebRtcTransport {
    fn set_playout_target(&self, _seconds: f64) -> bool {
        // webrtc-rs has no receive-side playout delay knob.
        false
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn start_negotiation(&self) -> Result<String> {
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            self.pc
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(Error::transport)?;
        }

        let dc = self
            .pc
            .create_data_channel("input", None)
            .await
            .map_err(Error::transport)?;

        let tx = self.events.clone();
        dc.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(TransportEvent::InputOpen).await;
            })
        }));

        let tx = self.events.clone();
        dc.on_close(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(TransportEvent::InputClosed).await;
            })
        }));

        let tx = self.events.clone();
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                match String::from_utf8(message.data.to_vec()) {
                    Ok(text) => {
                        let _ = tx.send(TransportEvent::InputMessage(text)).await;
                    }
                    Err(_) => debug!(
                        "dropping non-text input channel payload ({} bytes)",
                        message.data.len()
                    ),
                }
            })
        }));

        if let Ok(mut guard) = self.input.lock() {
            *guard = Some(dc);
        }

        let offer = self.pc.create_offer(None).await.map_err(Error::transport)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(Error::transport)?;
        Ok(offer.sdp)
    }

    async fn accept_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string()).map_err(Error::transport)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(Error::transport)?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(Error::transport)?;
        Ok(())
    }

    async fn video_stats(&self) -> Option<VideoReceiverStats> {
        let report = self.pc.get_stats().await;
        for stat in report.reports.values() {
            if let StatsReportType::InboundRTP(inbound) = stat {
                if inbound.kind != "video" {
                    continue;
                }
                return Some(VideoReceiverStats {
                    packets_received: inbound.packets_received,
                    packets_lost: inbound.packets_lost.max(0) as u64,
                    nack_count: inbound.nack_count,
                    // Not measured by this stack.
                    retransmissions: 0,
                    frames_decoded: self.video_frames.load(Ordering::Relaxed),
                    jitter_buffer_delay_s: 0.0,
                    jitter_buffer_emitted: 0,
                    timestamp_ms: now_ms(),
                });
            }
        }
        None
    }

    async fn close(&self) {
        let dc = self
            .input
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(dc) = dc {
            if let Err(err) = dc.close().await {
                debug!("input channel close: {err}");
            }
        }
        if let Err(err) = self.pc.close().await {
            warn!("peer connection close: {err}");
        }
    }
}

/// Drain RTP from a receive track so the stack keeps flowing, counting
/// depacketized video frames (marker bit ends a frame).
async fn drain_track(track: Arc<TrackRemote>, kind: MediaKind, frames: Arc<AtomicU64>) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if kind == MediaKind::Video && packet.header.marker {
                    frames.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                debug!("{kind} track reader stopped: {err}");
                break;
            }
        }
    }
}
