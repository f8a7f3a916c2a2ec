//! Signaling wire protocol for the PeerMesh relay server.
//!
//! Defines the event enums exchanged as JSON text frames over WebSocket
//! between browser clients and the relay. Events are adjacently tagged:
//! `{"event": "<name>", "data": {...}}`, with kebab-case event names and
//! the field spellings the browser side expects (`peerID`, `createOffer`,
//! `sessionDescription`, `iceCandidate`).
//!
//! SDP descriptions and ICE candidates are carried as [`serde_json::Value`]
//! — the relay never interprets them, it only routes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by a client to the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Request to join a room. The room id is not validated on join;
    /// only syntactically valid v4 UUID ids ever appear in the directory.
    Join {
        /// Room identifier chosen by the client.
        room: String,
    },

    /// Request to leave every currently joined room.
    Leave,

    /// Forward a session description to one peer in the mesh.
    RelaySdp {
        /// Target connection id.
        #[serde(rename = "peerID")]
        peer_id: String,
        /// Opaque SDP offer or answer, passed through unchanged.
        #[serde(rename = "sessionDescription")]
        session_description: Value,
    },

    /// Forward a connectivity candidate to one peer in the mesh.
    RelayIce {
        /// Target connection id.
        #[serde(rename = "peerID")]
        peer_id: String,
        /// Opaque ICE candidate, passed through unchanged.
        #[serde(rename = "iceCandidate")]
        ice_candidate: Value,
    },
}

/// Events sent by the relay server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Introduce a peer sharing a room with the receiver.
    ///
    /// `create_offer` assigns the handshake role: exactly one side of every
    /// introduced pair receives `true` and initiates the offer.
    AddPeer {
        /// Connection id of the introduced peer.
        #[serde(rename = "peerID")]
        peer_id: String,
        /// Whether the receiver should initiate the handshake.
        #[serde(rename = "createOffer")]
        create_offer: bool,
    },

    /// A peer left a room shared with the receiver (or disconnected).
    RemovePeer {
        /// Connection id of the departed peer.
        #[serde(rename = "peerID")]
        peer_id: String,
    },

    /// Delivered session description, tagged with the sender's id.
    SessionDescription {
        /// Connection id of the originating peer.
        #[serde(rename = "peerID")]
        peer_id: String,
        /// The forwarded description, byte-for-byte as sent.
        #[serde(rename = "sessionDescription")]
        session_description: Value,
    },

    /// Delivered connectivity candidate, tagged with the sender's id.
    IceCandidate {
        /// Connection id of the originating peer.
        #[serde(rename = "peerID")]
        peer_id: String,
        /// The forwarded candidate, byte-for-byte as sent.
        #[serde(rename = "iceCandidate")]
        ice_candidate: Value,
    },

    /// Full refresh of the discoverable room directory.
    ShareRooms {
        /// All non-empty rooms with syntactically valid v4 UUID ids.
        rooms: Vec<String>,
    },
}

/// Error type for signal encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Serialization to JSON failed.
    #[error("signal encode error: {0}")]
    Encode(String),
    /// Deserialization from JSON failed.
    #[error("signal decode error: {0}")]
    Decode(String),
}

/// Encodes a signaling event as a JSON text frame.
///
/// # Errors
///
/// Returns [`SignalError::Encode`] if the event cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, SignalError> {
    serde_json::to_string(event).map_err(|e| SignalError::Encode(e.to_string()))
}

/// Decodes a signaling event from a JSON text frame.
///
/// # Errors
///
/// Returns [`SignalError::Decode`] if the text is not a well-formed event.
pub fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, SignalError> {
    serde_json::from_str(text).map_err(|e| SignalError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_peer_wire_shape() {
        let event = ServerEvent::AddPeer {
            peer_id: "abc".to_string(),
            create_offer: true,
        };
        let text = encode(&event).unwrap();
        assert_eq!(
            text,
            r#"{"event":"add-peer","data":{"peerID":"abc","createOffer":true}}"#
        );
    }

    #[test]
    fn remove_peer_wire_shape() {
        let event = ServerEvent::RemovePeer {
            peer_id: "abc".to_string(),
        };
        let text = encode(&event).unwrap();
        assert_eq!(text, r#"{"event":"remove-peer","data":{"peerID":"abc"}}"#);
    }

    #[test]
    fn share_rooms_wire_shape() {
        let event = ServerEvent::ShareRooms {
            rooms: vec!["room-a".to_string(), "room-b".to_string()],
        };
        let text = encode(&event).unwrap();
        assert_eq!(
            text,
            r#"{"event":"share-rooms","data":{"rooms":["room-a","room-b"]}}"#
        );
    }

    #[test]
    fn decode_join_as_sent_by_browser() {
        let decoded: ClientEvent =
            decode(r#"{"event":"join","data":{"room":"my-room"}}"#).unwrap();
        assert_eq!(
            decoded,
            ClientEvent::Join {
                room: "my-room".to_string()
            }
        );
    }

    #[test]
    fn decode_leave_without_data() {
        let decoded: ClientEvent = decode(r#"{"event":"leave"}"#).unwrap();
        assert_eq!(decoded, ClientEvent::Leave);
    }

    #[test]
    fn decode_relay_sdp_preserves_payload() {
        let text = r#"{"event":"relay-sdp","data":{"peerID":"p1","sessionDescription":{"type":"offer","sdp":"v=0\r\n"}}}"#;
        let decoded: ClientEvent = decode(text).unwrap();
        match decoded {
            ClientEvent::RelaySdp {
                peer_id,
                session_description,
            } => {
                assert_eq!(peer_id, "p1");
                assert_eq!(
                    session_description,
                    json!({"type": "offer", "sdp": "v=0\r\n"})
                );
            }
            other => panic!("expected RelaySdp, got {other:?}"),
        }
    }

    #[test]
    fn session_description_round_trip_is_opaque() {
        let payload = json!({
            "type": "answer",
            "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n",
            "extra": [1, 2, {"nested": null}],
        });
        let event = ServerEvent::SessionDescription {
            peer_id: "origin".to_string(),
            session_description: payload.clone(),
        };
        let text = encode(&event).unwrap();
        let decoded: ServerEvent = decode(&text).unwrap();
        assert_eq!(
            decoded,
            ServerEvent::SessionDescription {
                peer_id: "origin".to_string(),
                session_description: payload,
            }
        );
    }

    #[test]
    fn ice_candidate_field_names() {
        let event = ServerEvent::IceCandidate {
            peer_id: "p2".to_string(),
            ice_candidate: json!({"candidate": "candidate:0 1 UDP 2122252543", "sdpMLineIndex": 0}),
        };
        let text = encode(&event).unwrap();
        assert!(text.contains(r#""event":"ice-candidate""#));
        assert!(text.contains(r#""peerID":"p2""#));
        assert!(text.contains(r#""iceCandidate""#));
    }

    #[test]
    fn decode_unknown_event_fails() {
        let result: Result<ClientEvent, SignalError> =
            decode(r#"{"event":"shout","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn decode_corrupt_text_fails() {
        let result: Result<ClientEvent, SignalError> = decode("{not json");
        assert!(result.is_err());
    }
}
