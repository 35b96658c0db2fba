//! Wire protocol for the relay connection and the auxiliary input channel.
//!
//! Everything on the wire is one JSON object per logical event, tagged by a
//! lowercase `type` field. The relay only forwards these; it never interprets
//! media.

use serde::{Deserialize, Serialize};

/// Signaling message exchanged with the host through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Local session offer (guest -> host).
    Offer { sdp: String },

    /// Remote session answer (host -> guest).
    Answer { sdp: String },

    /// Connectivity candidate, either direction.
    Candidate { candidate: IceCandidate },

    /// Host-assigned client id, sent any time after the offer.
    Welcome { client_id: String },

    /// Orderly teardown notification, either direction.
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Optional guest display name (guest -> host).
    Name { name: String },
}

/// Normalized ICE candidate record.
///
/// Hosts spell the fields in either camelCase or snake_case depending on
/// their stack; both are accepted and coalesce into this one record. We
/// always emit camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,

    #[serde(rename = "sdpMid", alias = "sdp_mid", default)]
    pub sdp_mid: Option<String>,

    #[serde(rename = "sdpMLineIndex", alias = "sdp_mline_index", default)]
    pub sdp_mline_index: Option<u16>,

    #[serde(rename = "usernameFragment", alias = "username_fragment", default)]
    pub username_fragment: Option<String>,
}

/// Message on the auxiliary "input" data channel.
///
/// Anything that does not parse as one of these is opaque diagnostic text
/// and is logged verbatim by the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputMessage {
    /// Full state of the selected gamepad.
    Gamepad { gamepad: GamepadSnapshot },

    /// RTT probe from the host. `sent_at` is opaque to the guest.
    Ping { sent_at: serde_json::Number },

    /// Probe reply; echoes `sent_at` untouched.
    Pong { sent_at: serde_json::Number },
}

/// Serialized state of one input device, recomputed every poll tick.
///
/// Field order matters: change suppression compares the serialized form, so
/// serialization has to be deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadSnapshot {
    pub id: String,
    pub index: usize,
    pub buttons: Vec<GamepadButton>,
    pub axes: Vec<f64>,
    pub connected: bool,
    pub mapping: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamepadButton {
    pub pressed: bool,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_message_tags_are_lowercase() {
        let json = serde_json::to_string(&SignalMessage::Offer {
            sdp: "v=0".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"offer\""));

        let json = serde_json::to_string(&SignalMessage::Name {
            name: "guest".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"name\""));
    }

    #[test]
    fn test_candidate_accepts_camel_case() {
        let json = r#"{"candidate":"candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}"#;
        let parsed: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.sdp_mid.as_deref(), Some("0"));
        assert_eq!(parsed.sdp_mline_index, Some(0));
        assert_eq!(parsed.username_fragment.as_deref(), Some("abcd"));
    }

    #[test]
    fn test_candidate_snake_case_normalizes_to_same_record() {
        let camel = r#"{"candidate":"candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}"#;
        let snake = r#"{"candidate":"candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host","sdp_mid":"0","sdp_mline_index":0,"username_fragment":"abcd"}"#;
        let a: IceCandidate = serde_json::from_str(camel).unwrap();
        let b: IceCandidate = serde_json::from_str(snake).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_candidate_serializes_camel_case() {
        let candidate = IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(1),
            username_fragment: None,
        };
        let json = serde_json::to_string(&candidate).unwrap();
        assert!(json.contains("\"sdpMid\""));
        assert!(json.contains("\"sdpMLineIndex\""));
        assert!(!json.contains("sdp_mid"));
    }

    #[test]
    fn test_candidate_missing_optional_fields() {
        let json = r#"{"candidate":"candidate:1"}"#;
        let parsed: IceCandidate = serde_json::from_str(json).unwrap();
        assert!(parsed.sdp_mid.is_none());
        assert!(parsed.sdp_mline_index.is_none());
    }

    #[test]
    fn test_disconnect_reason_is_optional() {
        let parsed: SignalMessage = serde_json::from_str(r#"{"type":"disconnect"}"#).unwrap();
        assert_eq!(parsed, SignalMessage::Disconnect { reason: None });
    }

    #[test]
    fn test_welcome_round_trip() {
        let msg = SignalMessage::Welcome {
            client_id: "guest-7".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"client_id\""));
        let back: SignalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_ping_echo_preserves_integer_representation() {
        let parsed: InputMessage =
            serde_json::from_str(r#"{"type":"ping","sent_at":12345}"#).unwrap();
        let InputMessage::Ping { sent_at } = parsed else {
            panic!("expected ping");
        };
        let pong = InputMessage::Pong { sent_at };
        let json = serde_json::to_string(&pong).unwrap();
        assert_eq!(json, r#"{"type":"pong","sent_at":12345}"#);
    }

    #[test]
    fn test_unknown_input_message_is_an_error() {
        assert!(serde_json::from_str::<InputMessage>(r#"{"type":"mystery"}"#).is_err());
        assert!(serde_json::from_str::<InputMessage>("not json at all").is_err());
    }
}
