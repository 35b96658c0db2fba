//! Differential gamepad streaming over the auxiliary channel.
//!
//! One selected device is sampled on a fixed timer; a snapshot only goes on
//! the wire when its serialized form differs from the last one sent.
//! Delivery is best-effort: a failed send is logged and retried naturally on
//! the next tick. The streamer also answers the host's RTT probes.

use std::collections::HashMap;
use std::time::UNIX_EPOCH;

use gilrs::{Axis, Button, Event, Gamepad, Gilrs, MappingSource};
use tracing::{info, warn};

use sofa_common::{GamepadButton, GamepadSnapshot, InputMessage};
use sofa_transport::InputSink;

/// W3C standard-gamepad button order, which is what hosts expect.
const BUTTON_ORDER: [Button; 17] = [
    Button::South,
    Button::East,
    Button::West,
    Button::North,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger2,
    Button::Select,
    Button::Start,
    Button::LeftThumb,
    Button::RightThumb,
    Button::DPadUp,
    Button::DPadDown,
    Button::DPadLeft,
    Button::DPadRight,
    Button::Mode,
];

const AXIS_ORDER: [Axis; 4] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::RightStickX,
    Axis::RightStickY,
];

/// Source of input-device snapshots.
pub trait PadSource: Send {
    /// Pump device events and snapshot every currently connected pad,
    /// ascending by index.
    fn poll(&mut self) -> Vec<GamepadSnapshot>;
}

/// `PadSource` backed by gilrs.
///
/// When gilrs fails to initialize (headless CI, missing backend) the source
/// simply reports no devices.
pub struct GilrsSource {
    gilrs: Option<Gilrs>,
    last_event_ms: HashMap<usize, f64>,
}

impl GilrsSource {
    pub fn new() -> Self {
        let gilrs = match Gilrs::new() {
            Ok(gilrs) => Some(gilrs),
            Err(err) => {
                warn!("gilrs init failed: {err}; gamepad streaming disabled");
                None
            }
        };
        Self {
            gilrs,
            last_event_ms: HashMap::new(),
        }
    }
}

impl Default for GilrsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PadSource for GilrsSource {
    fn poll(&mut self) -> Vec<GamepadSnapshot> {
        let Some(gilrs) = self.gilrs.as_mut() else {
            return Vec::new();
        };

        while let Some(Event { id, time, .. }) = gilrs.next_event() {
            let index = Into::<usize>::into(id);
            let ms = time
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64()
                * 1000.0;
            self.last_event_ms.insert(index, ms);
        }

        let mut pads: Vec<GamepadSnapshot> = gilrs
            .gamepads()
            .map(|(id, pad)| {
                let index = Into::<usize>::into(id);
                let timestamp = self.last_event_ms.get(&index).copied().unwrap_or(0.0);
                snapshot_pad(index, &pad, timestamp)
            })
            .collect();
        pads.sort_by_key(|pad| pad.index);
        pads
    }
}

fn snapshot_pad(index: usize, pad: &Gamepad<'_>, timestamp: f64) -> GamepadSnapshot {
    GamepadSnapshot {
        id: pad.name().to_string(),
        index,
        buttons: BUTTON_ORDER
            .iter()
            .map(|button| GamepadButton {
                pressed: pad.is_pressed(*button),
                value: pad
                    .button_data(*button)
                    .map(|data| f64::from(data.value()))
                    .unwrap_or(0.0),
            })
            .collect(),
        axes: AXIS_ORDER
            .iter()
            .map(|axis| f64::from(pad.value(*axis)))
            .collect(),
        connected: pad.is_connected(),
        mapping: match pad.mapping_source() {
            MappingSource::SdlMappings => "standard".to_string(),
            _ => String::new(),
        },
        timestamp,
    }
}

/// Forwards the selected device's state and answers RTT probes.
pub struct InputStreamer {
    preferred_index: Option<usize>,
    last_sent: Option<String>,
}

impl InputStreamer {
    pub fn new(preferred_index: Option<usize>) -> Self {
        Self {
            preferred_index,
            last_sent: None,
        }
    }

    /// Index of the device currently being streamed, for persistence.
    pub fn selected_index(&self) -> Option<usize> {
        self.preferred_index
    }

    /// Forget the last-sent state. Called when the channel (re)opens so the
    /// first tick always transmits.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    /// Pick the device to stream: the preferred one if still connected,
    /// otherwise the lowest-index connected pad. Sticks to the fallback.
    fn select<'a>(&mut self, pads: &'a [GamepadSnapshot]) -> Option<&'a GamepadSnapshot> {
        let chosen = self
            .preferred_index
            .and_then(|index| {
                pads.iter()
                    .find(|pad| pad.index == index && pad.connected)
            })
            .or_else(|| pads.iter().filter(|pad| pad.connected).min_by_key(|pad| pad.index));
        if let Some(pad) = chosen {
            self.preferred_index = Some(pad.index);
        }
        chosen
    }

    /// One poll tick: sample, suppress unchanged state, send.
    pub async fn poll_once<S>(&mut self, source: &mut dyn PadSource, sink: &S)
    where
        S: InputSink + ?Sized,
    {
        if !sink.is_open() {
            return;
        }
        let pads = source.poll();
        let Some(pad) = self.select(&pads) else {
            return;
        };

        let payload = match serde_json::to_string(&InputMessage::Gamepad {
            gamepad: pad.clone(),
        }) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to serialize gamepad state: {err}");
                return;
            }
        };
        if self.last_sent.as_deref() == Some(payload.as_str()) {
            return;
        }

        match sink.send_text(&payload).await {
            // Only a confirmed send updates the suppression baseline.
            Ok(()) => self.last_sent = Some(payload),
            Err(err) => warn!("failed to send gamepad state: {err}"),
        }
    }

    /// Inbound auxiliary-channel payload: answer pings, log the rest.
    pub async fn handle_channel_message<S>(&self, raw: &str, sink: &S)
    where
        S: InputSink + ?Sized,
    {
        if let Ok(InputMessage::Ping { sent_at }) = serde_json::from_str::<InputMessage>(raw) {
            if !sink.is_open() {
                return;
            }
            let pong = InputMessage::Pong { sent_at };
            match serde_json::to_string(&pong) {
                Ok(payload) => {
                    if let Err(err) = sink.send_text(&payload).await {
                        warn!("failed to send pong: {err}");
                    }
                }
                Err(err) => warn!("failed to serialize pong: {err}"),
            }
            return;
        }
        info!("recv from host: {raw}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use sofa_common::{Error, Result};

    struct FakePads {
        frames: VecDeque<Vec<GamepadSnapshot>>,
    }

    impl FakePads {
        fn new(frames: Vec<Vec<GamepadSnapshot>>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl PadSource for FakePads {
        fn poll(&mut self) -> Vec<GamepadSnapshot> {
            self.frames.pop_front().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct FakeSink {
        closed: AtomicBool,
        fail_next: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl FakeSink {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InputSink for FakeSink {
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: &str) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::transport("send failed"));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn pad(index: usize, axis_x: f64) -> GamepadSnapshot {
        GamepadSnapshot {
            id: format!("pad-{index}"),
            index,
            buttons: vec![GamepadButton {
                pressed: false,
                value: 0.0,
            }],
            axes: vec![axis_x, 0.0],
            connected: true,
            mapping: "standard".to_string(),
            timestamp: 1000.0,
        }
    }

    #[tokio::test]
    async fn test_identical_snapshots_send_once() {
        let mut streamer = InputStreamer::new(None);
        let mut pads = FakePads::new(vec![vec![pad(0, 0.5)], vec![pad(0, 0.5)]]);
        let sink = FakeSink::default();

        streamer.poll_once(&mut pads, &sink).await;
        streamer.poll_once(&mut pads, &sink).await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("\"type\":\"gamepad\""));
    }

    #[tokio::test]
    async fn test_changed_snapshot_sends_again() {
        let mut streamer = InputStreamer::new(None);
        let mut pads = FakePads::new(vec![vec![pad(0, 0.0)], vec![pad(0, 0.9)]]);
        let sink = FakeSink::default();

        streamer.poll_once(&mut pads, &sink).await;
        streamer.poll_once(&mut pads, &sink).await;

        assert_eq!(sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_baseline_stale() {
        let mut streamer = InputStreamer::new(None);
        let mut pads = FakePads::new(vec![vec![pad(0, 0.5)], vec![pad(0, 0.5)]]);
        let sink = FakeSink::default();
        sink.fail_next.store(true, Ordering::SeqCst);

        streamer.poll_once(&mut pads, &sink).await;
        assert_eq!(sink.sent().len(), 0);

        // The same state goes out on the next tick because the failed send
        // never became the suppression baseline.
        streamer.poll_once(&mut pads, &sink).await;
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_sink_sends_nothing() {
        let mut streamer = InputStreamer::new(None);
        let mut pads = FakePads::new(vec![vec![pad(0, 0.5)]]);
        let sink = FakeSink::default();
        sink.closed.store(true, Ordering::SeqCst);

        streamer.poll_once(&mut pads, &sink).await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_preferred_pad_is_used_when_connected() {
        let mut streamer = InputStreamer::new(Some(2));
        let mut pads = FakePads::new(vec![vec![pad(0, 0.1), pad(2, 0.2)]]);
        let sink = FakeSink::default();

        streamer.poll_once(&mut pads, &sink).await;
        assert!(sink.sent()[0].contains("pad-2"));
        assert_eq!(streamer.selected_index(), Some(2));
    }

    #[tokio::test]
    async fn test_falls_back_to_lowest_index() {
        let mut streamer = InputStreamer::new(Some(7));
        let mut pads = FakePads::new(vec![vec![pad(3, 0.1), pad(1, 0.2)]]);
        let sink = FakeSink::default();

        streamer.poll_once(&mut pads, &sink).await;
        assert!(sink.sent()[0].contains("pad-1"));
        assert_eq!(streamer.selected_index(), Some(1));
    }

    #[tokio::test]
    async fn test_disconnected_preferred_pad_is_skipped() {
        let mut disconnected = pad(0, 0.0);
        disconnected.connected = false;
        let mut streamer = InputStreamer::new(Some(0));
        let mut pads = FakePads::new(vec![vec![disconnected, pad(1, 0.4)]]);
        let sink = FakeSink::default();

        streamer.poll_once(&mut pads, &sink).await;
        assert!(sink.sent()[0].contains("pad-1"));
    }

    #[tokio::test]
    async fn test_no_connected_pads_no_snapshot() {
        let mut streamer = InputStreamer::new(None);
        let mut pads = FakePads::new(vec![vec![]]);
        let sink = FakeSink::default();

        streamer.poll_once(&mut pads, &sink).await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reset_retransmits_after_reopen() {
        let mut streamer = InputStreamer::new(None);
        let mut pads = FakePads::new(vec![vec![pad(0, 0.5)], vec![pad(0, 0.5)]]);
        let sink = FakeSink::default();

        streamer.poll_once(&mut pads, &sink).await;
        streamer.reset();
        streamer.poll_once(&mut pads, &sink).await;
        assert_eq!(sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_ping_yields_exactly_one_pong() {
        let streamer = InputStreamer::new(None);
        let sink = FakeSink::default();

        streamer
            .handle_channel_message(r#"{"type":"ping","sent_at":12345}"#, &sink)
            .await;

        let sent = sink.sent();
        assert_eq!(sent, vec![r#"{"type":"pong","sent_at":12345}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_payload_sends_nothing() {
        let streamer = InputStreamer::new(None);
        let sink = FakeSink::default();

        streamer.handle_channel_message("hello from host", &sink).await;
        streamer
            .handle_channel_message(r#"{"type":"mystery"}"#, &sink)
            .await;
        assert!(sink.sent().is_empty());
    }
}
