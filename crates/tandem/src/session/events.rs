use std::collections::BTreeMap;

use crate::entity::NetEntityRecord;
use crate::net::{ConnectionState, DespawnReason, EntitySpawn, GamePhase, NetEntityId, PeerId, SessionRole};
use crate::transport::{TransportError, TransportKind};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    PeerJoined {
        peer_id: PeerId,
        name: String,
    },
    PeerLeft {
        peer_id: PeerId,
        reason: String,
    },
    /// The host accepted our handshake.
    Joined {
        host_name: String,
        peer_id: PeerId,
    },
    /// The host created an entity; the game should create a body for it and
    /// bind it with `GameSession::bind_remote_entity`.
    EntitySpawned(EntitySpawn),
    EntityDespawned {
        net_entity_id: NetEntityId,
        record: Option<NetEntityRecord>,
        reason: Option<DespawnReason>,
    },
    GameStarted,
    GamePaused,
    GameResumed,
    GameEnded {
        outcome: Option<GamePhase>,
    },
    GameEvent {
        from: PeerId,
        name: String,
        data: BTreeMap<String, String>,
    },
    Error(TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("a relay url is required for relay sessions")]
    MissingRelayUrl,
    #[error("session is not active")]
    NotActive,
    #[error("operation requires the {expected:?} role")]
    RoleMismatch { expected: SessionRole },
    #[error("configured for {expected} but given a {actual} transport")]
    TransportMismatch {
        expected: TransportKind,
        actual: TransportKind,
    },
}
