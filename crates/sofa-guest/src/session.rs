//! Session lifecycle: one guest <-> host link from connect to teardown.
//!
//! Everything runs on one sequential timeline: signaling messages, transport
//! events and the two periodic timers all land in a single `select!` loop,
//! so no handler ever races another. Handlers still check the session state
//! before acting, because timer ticks and transport callbacks keep arriving
//! while teardown is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sofa_common::{Error, IceCandidate, Result, SignalMessage};
use sofa_transport::{MediaKind, Transport, TransportEvent, TransportFactory};

use crate::config::GuestConfig;
use crate::input::{GilrsSource, InputStreamer, PadSource};
use crate::jitter::{FreezeDetector, JitterBufferController};
use crate::signaling::{SignalingChannel, SignalingSender};
use crate::stats::StatsSampler;
use crate::storage::DiagnosticLog;

const TRANSPORT_EVENT_DEPTH: usize = 64;

/// Lifecycle states of one session. `Idle` is initial and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Negotiating,
    Connected,
    Disconnecting,
}

/// Why a session ended; drives the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The local user asked for the teardown.
    UserRequested,
    /// The host or relay asked for the teardown.
    RemoteDisconnect,
    /// The relay connection failed or closed unexpectedly.
    ChannelLost,
    /// The freeze detector declared the stream dead.
    MediaFrozen,
    /// Offer/answer negotiation could not complete.
    NegotiationFailed,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Whether the session reached `Connected` at least once.
    pub established: bool,
    pub end: SessionEnd,
    pub reason: String,
    /// Device index the input streamer settled on, for persistence.
    pub selected_gamepad: Option<usize>,
}

/// One guest <-> host link and everything it owns.
///
/// The transport, the signaling sender and the input device source all
/// belong exclusively to this aggregate and die with it; a reconnect builds
/// a fresh one.
pub struct Session {
    id: Uuid,
    state: SessionState,
    client_id: Option<String>,
    disconnect_reason: Option<String>,
    end: SessionEnd,
    established: bool,
    config: GuestConfig,
    signal: SignalingSender,
    transport: Option<Box<dyn Transport>>,
    pending_candidates: Vec<IceCandidate>,
    remote_described: bool,
    controller: JitterBufferController,
    freeze: FreezeDetector,
    sampler: StatsSampler,
    streamer: InputStreamer,
    pads: Box<dyn PadSource>,
    video_attached: bool,
    input_open: bool,
    diag: DiagnosticLog,
}

impl Session {
    pub fn new(
        config: GuestConfig,
        signal: SignalingSender,
        pads: Box<dyn PadSource>,
        diag: DiagnosticLog,
    ) -> Self {
        let controller = JitterBufferController::new(config.video_queue_frames, config.tuning);
        let freeze = FreezeDetector::new(&config.tuning);
        let streamer = InputStreamer::new(config.gamepad_index);
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            client_id: None,
            disconnect_reason: None,
            end: SessionEnd::ChannelLost,
            established: false,
            config,
            signal,
            transport: None,
            pending_candidates: Vec::new(),
            remote_described: false,
            controller,
            freeze,
            sampler: StatsSampler::new(),
            streamer,
            pads,
            video_attached: false,
            input_open: false,
            diag,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Drive the session until terminal disconnect.
    pub async fn run(
        mut self,
        factory: Arc<dyn TransportFactory>,
        mut incoming: mpsc::Receiver<SignalMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionOutcome {
        let (events_tx, mut events_rx) = mpsc::channel(TRANSPORT_EVENT_DEPTH);
        // Keep one sender alive so the event stream never ends early.
        let _events_keepalive = events_tx.clone();

        if let Err(err) = self.negotiate(factory.as_ref(), events_tx).await {
            warn!("negotiation failed: {err}");
            self.disconnect(SessionEnd::NegotiationFailed, &err.to_string(), true)
                .await;
        }

        let mut stats_timer = time::interval(self.config.stats_interval);
        let mut input_timer = time::interval(self.config.input_poll_interval);

        while self.state != SessionState::Disconnecting {
            tokio::select! {
                message = incoming.recv() => match message {
                    Some(message) => self.on_signal(message).await,
                    None => {
                        self.disconnect(SessionEnd::ChannelLost, "relay channel closed", false)
                            .await
                    }
                },
                event = events_rx.recv() => {
                    if let Some(event) = event {
                        self.on_transport_event(event).await;
                    }
                }
                _ = stats_timer.tick() => self.on_stats_tick().await,
                _ = input_timer.tick() => self.on_input_tick().await,
                _ = shutdown.changed() => {
                    self.disconnect(SessionEnd::UserRequested, "guest requested disconnect", true)
                        .await
                }
            }
        }

        self.signal.close().await;
        self.state = SessionState::Idle;
        SessionOutcome {
            established: self.established,
            end: self.end,
            reason: self.disconnect_reason.clone().unwrap_or_default(),
            selected_gamepad: self.streamer.selected_index(),
        }
    }

    /// Channel-open side effects: announce the display name, build a fresh
    /// transport, produce the offer and relay it.
    async fn negotiate(
        &mut self,
        factory: &dyn TransportFactory,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        self.diag.append("relay channel open");

        if let Some(name) = self.config.guest_name.clone().filter(|n| !n.is_empty()) {
            self.signal.send(SignalMessage::Name { name }).await;
        }

        let transport = factory.create(events).await?;
        let offer = transport.start_negotiation().await?;
        self.transport = Some(transport);
        self.state = SessionState::Negotiating;
        debug!("session {} sending offer", self.id);
        self.signal.send(SignalMessage::Offer { sdp: offer }).await;
        Ok(())
    }

    async fn on_signal(&mut self, message: SignalMessage) {
        if self.state == SessionState::Disconnecting {
            return;
        }
        match message {
            SignalMessage::Answer { sdp } => self.on_answer(sdp).await,
            SignalMessage::Welcome { client_id } => {
                info!("received client id from host: {client_id}");
                self.diag.append(&format!("client id: {client_id}"));
                self.client_id = Some(client_id);
            }
            SignalMessage::Candidate { candidate } => self.on_remote_candidate(candidate).await,
            SignalMessage::Disconnect { reason } => {
                let reason = reason.unwrap_or_else(|| "host requested disconnect".to_string());
                self.disconnect(SessionEnd::RemoteDisconnect, &reason, false)
                    .await;
            }
            other => debug!("ignoring unexpected signaling message: {other:?}"),
        }
    }

    async fn on_answer(&mut self, sdp: String) {
        if self.state != SessionState::Negotiating {
            debug!("ignoring answer in state {:?}", self.state);
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        self.diag.append("received answer");
        if let Err(err) = transport.accept_answer(&sdp).await {
            warn!("failed to apply answer: {err}");
            self.diag.append(&format!("answer apply error: {err}"));
            self.disconnect(SessionEnd::NegotiationFailed, "failed to apply answer", true)
                .await;
            return;
        }
        self.remote_described = true;
        self.flush_pending_candidates().await;
        self.state = SessionState::Connected;
        self.established = true;
        info!("session {} connected", self.id);
        self.diag.append("session connected");
    }

    /// Candidates can arrive before or after the answer; early ones wait
    /// until the remote description lands.
    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_described || self.transport.is_none() {
            debug!("queueing candidate until remote description is set");
            self.pending_candidates.push(candidate);
            return;
        }
        self.apply_candidate(candidate).await;
    }

    async fn flush_pending_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        // Candidate failures are non-fatal; the pair just never forms.
        if let Err(err) = transport.add_remote_candidate(candidate).await {
            warn!("failed to apply candidate: {err}");
            self.diag.append(&format!("candidate apply error: {err}"));
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        if self.state == SessionState::Disconnecting {
            return;
        }
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.signal
                    .send(SignalMessage::Candidate { candidate })
                    .await;
            }
            TransportEvent::TrackAttached { kind, frame_rate } => {
                info!("track attached: {kind}");
                self.diag.append(&format!("{kind} track attached"));
                if kind == MediaKind::Video {
                    let target = self.controller.on_track_attached(frame_rate);
                    self.apply_playout_target(target);
                    self.sampler.reset();
                    self.freeze.reset();
                    self.video_attached = true;
                }
            }
            TransportEvent::FrameRateChanged { kind, frame_rate } => {
                if kind == MediaKind::Video {
                    if let Some(target) = self.controller.on_frame_rate_changed(frame_rate) {
                        self.apply_playout_target(target);
                    }
                }
            }
            TransportEvent::InputOpen => {
                info!("input channel open");
                self.diag.append("input channel open");
                self.streamer.reset();
                self.input_open = true;
            }
            TransportEvent::InputClosed => {
                info!("input channel closed");
                self.diag.append("input channel closed");
                self.input_open = false;
            }
            TransportEvent::InputMessage(raw) => {
                if let Some(transport) = self.transport.as_deref() {
                    self.streamer.handle_channel_message(&raw, transport).await;
                }
            }
            TransportEvent::ConnectionState(state) => {
                info!("transport state: {state}");
                self.diag.append(&format!("transport state: {state}"));
            }
        }
    }

    async fn on_stats_tick(&mut self) {
        if self.state == SessionState::Disconnecting || !self.video_attached {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let Some(snapshot) = transport.video_stats().await else {
            debug!("no inbound video stats this tick");
            return;
        };

        if self
            .freeze
            .observe(snapshot.frames_decoded, snapshot.timestamp_ms)
        {
            self.diag
                .append("video seems frozen; disconnecting");
            self.disconnect(SessionEnd::MediaFrozen, "video stream frozen", true)
                .await;
            return;
        }

        if let Some(delta) = self.sampler.observe(snapshot) {
            if let Some(target) = self.controller.on_stats_tick(&delta) {
                self.apply_playout_target(target);
            }
            self.diag.append(&format!(
                "video stats: received={} lost={} nacks={} retrans={} queue={} target={:.1}ms",
                delta.packets_received,
                delta.packets_lost,
                delta.nack_count,
                delta.retransmissions,
                self.controller.dynamic_frames(),
                self.controller.target_seconds() * 1000.0,
            ));
        }
    }

    async fn on_input_tick(&mut self) {
        if self.state == SessionState::Disconnecting || !self.input_open {
            return;
        }
        let Some(transport) = self.transport.as_deref() else {
            return;
        };
        self.streamer
            .poll_once(self.pads.as_mut(), transport)
            .await;
    }

    fn apply_playout_target(&self, seconds: f64) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        if transport.set_playout_target(seconds) {
            info!("jitter buffer target set to {:.1} ms", seconds * 1000.0);
        } else {
            debug!(
                "transport exposes no buffer-depth control point; deferring {:.1} ms target",
                seconds * 1000.0
            );
        }
    }

    /// Tear the session down. Idempotent: re-entrant triggers are ignored.
    /// When the teardown is locally initiated the peer is notified before
    /// the relay channel closes.
    async fn disconnect(&mut self, end: SessionEnd, reason: &str, locally_initiated: bool) {
        if matches!(self.state, SessionState::Disconnecting | SessionState::Idle) {
            return;
        }
        info!("disconnecting session {}: {reason}", self.id);
        self.diag.append(&format!("disconnecting: {reason}"));
        self.state = SessionState::Disconnecting;
        self.end = end;
        self.disconnect_reason = Some(reason.to_string());
        self.video_attached = false;
        self.input_open = false;

        if locally_initiated {
            self.signal
                .send(SignalMessage::Disconnect {
                    reason: Some(reason.to_string()),
                })
                .await;
        }

        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
    }
}

/// Owns at most one live session.
pub struct Guest {
    active: Arc<AtomicBool>,
}

impl Default for Guest {
    fn default() -> Self {
        Self::new()
    }
}

impl Guest {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the single session slot; a second claim while one is held is
    /// rejected.
    fn try_claim(&self) -> Result<ActiveGuard> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(Error::busy("a session is already in progress"));
        }
        Ok(ActiveGuard(self.active.clone()))
    }

    /// Run one full session: open the relay channel, negotiate, stream
    /// until terminal disconnect. Rejected while another session is live.
    pub async fn connect(
        &self,
        config: GuestConfig,
        factory: Arc<dyn TransportFactory>,
        diag: DiagnosticLog,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SessionOutcome> {
        let _guard = self.try_claim()?;
        let channel = SignalingChannel::connect(&config.relay_url).await?;
        info!("relay channel open: {}", config.relay_url);
        let pads: Box<dyn PadSource> = Box::new(GilrsSource::new());
        let session = Session::new(config, channel.sender.clone(), pads, diag);
        Ok(session.run(factory, channel.incoming, shutdown).await)
    }
}

struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
