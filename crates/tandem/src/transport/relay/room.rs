//! JSON frames exchanged with the relay server.

use serde::{Deserialize, Serialize};

use crate::net::{NetworkMessage, PeerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPeer {
    pub peer_id: PeerId,
    pub name: String,
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RoomRequest {
    CreateRoom {
        game_id: String,
        device_name: String,
        peer_id: PeerId,
    },
    JoinRoom {
        room_id: String,
        device_name: String,
        peer_id: PeerId,
    },
    RejoinRoom {
        room_id: String,
        device_name: String,
        peer_id: PeerId,
    },
    LeaveRoom,
    Relay {
        to_peer_id: PeerId,
        message: NetworkMessage,
    },
    Broadcast {
        message: NetworkMessage,
    },
}

/// Server to client. Relayed frames carry the sender's peer id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    RoomCreated {
        room_id: String,
    },
    RoomJoined {
        room_id: String,
        peers: Vec<RoomPeer>,
    },
    PeerJoined {
        peer_id: PeerId,
        peer_name: String,
    },
    PeerLeft {
        peer_id: PeerId,
    },
    Relay {
        peer_id: PeerId,
        message: NetworkMessage,
    },
    Broadcast {
        peer_id: PeerId,
        message: NetworkMessage,
    },
    Error {
        error: String,
    },
}

impl RoomRequest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl RoomEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Payload;

    #[test]
    fn test_request_wire_names() {
        let join = RoomRequest::JoinRoom {
            room_id: "ABC234".into(),
            device_name: "Pixel".into(),
            peer_id: "ws-1".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&join.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "join_room");
        assert_eq!(json["roomId"], "ABC234");
        assert_eq!(json["deviceName"], "Pixel");

        let leave = RoomRequest::LeaveRoom.to_json().unwrap();
        assert_eq!(leave, r#"{"type":"leave_room"}"#);
    }

    #[test]
    fn test_relayed_event_embeds_game_message() {
        let text = r#"{
            "type": "relay",
            "peerId": "ws-host",
            "message": {"type": "game_start", "timestamp": 5, "sequence": 1, "senderId": "ws-host"}
        }"#;

        match RoomEvent::from_json(text).unwrap() {
            RoomEvent::Relay { peer_id, message } => {
                assert_eq!(peer_id, "ws-host");
                assert_eq!(message.payload, Payload::GameStart);
                assert_eq!(message.header.sequence, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_room_joined_lists_peers() {
        let text = r#"{"type":"room_joined","roomId":"R1","peers":[{"peerId":"ws-h","name":"Host"}]}"#;
        assert_eq!(
            RoomEvent::from_json(text).unwrap(),
            RoomEvent::RoomJoined {
                room_id: "R1".into(),
                peers: vec![RoomPeer {
                    peer_id: "ws-h".into(),
                    name: "Host".into(),
                }],
            }
        );
    }
}
