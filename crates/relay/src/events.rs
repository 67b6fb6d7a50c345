use tandem::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    RoomCreated { room_id: String, host: PeerId, game_id: String },
    PeerJoined { room_id: String, peer_id: PeerId, name: String },
    PeerRejoined { room_id: String, peer_id: PeerId },
    PeerLeft { room_id: String, peer_id: PeerId },
    RoomClosed { room_id: String },
    Rejected { peer_id: PeerId, reason: String },
}

impl RelayEvent {
    pub fn log(&self) {
        match self {
            RelayEvent::RoomCreated { room_id, host, game_id } => {
                log::info!("Room {} created by {} for {}", room_id, host, game_id)
            }
            RelayEvent::PeerJoined { room_id, peer_id, name } => {
                log::info!("{} ({}) joined room {}", name, peer_id, room_id)
            }
            RelayEvent::PeerRejoined { room_id, peer_id } => {
                log::info!("{} rejoined room {}", peer_id, room_id)
            }
            RelayEvent::PeerLeft { room_id, peer_id } => {
                log::info!("{} left room {}", peer_id, room_id)
            }
            RelayEvent::RoomClosed { room_id } => log::info!("Room {} closed (empty)", room_id),
            RelayEvent::Rejected { peer_id, reason } => {
                log::warn!("Rejected {}: {}", peer_id, reason)
            }
        }
    }
}
