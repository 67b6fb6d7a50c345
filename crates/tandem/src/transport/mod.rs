//! Message transports behind one poll-driven interface.
//!
//! A transport never blocks. Operations that take time on a real link (scans,
//! connects, socket opens) are started by a call and finish on a later
//! [`Transport::poll`], reporting their outcome through [`TransportEvent`]s.

pub mod radio;
pub mod relay;

use std::collections::vec_deque::Drain;
use std::time::Instant;

use crate::net::{ConnectionState, NetworkMessage, NetworkStats, PROTOCOL_VERSION, PeerId, SessionRole};

pub use radio::{
    LinkError, LinkEvent, LoopbackAir, LoopbackRadio, RadioConfig, RadioLink, RadioTransport,
    SessionInfo,
};
pub use relay::{
    MemorySocket, RelayConfig, RelaySocket, RelayTransport, RoomEvent, RoomPeer, RoomRequest,
    SocketEvent, WsSocket,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Short-range radio with chunked writes.
    Radio,
    /// Internet socket through a relay server.
    Relay,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Radio => "radio",
            TransportKind::Relay => "relay",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub device_name: String,
    pub game_id: String,
    pub game_version: String,
    /// Session to host under, or to look for when joining. On the relay this
    /// is the room code and is required to join.
    pub session_id: Option<String>,
}

impl TransportConfig {
    pub fn new(device_name: impl Into<String>, game_id: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            game_id: game_id.into(),
            game_version: PROTOCOL_VERSION.to_string(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not initialized")]
    NotInitialized,
    #[error("radio is unavailable: {0}")]
    RadioUnavailable(String),
    #[error("a session is already active ({0})")]
    AlreadyActive(ConnectionState),
    #[error("a session id is required to join")]
    MissingSessionId,
    #[error("no host found for game {0}")]
    NoHostFound(String),
    #[error("connection timed out")]
    ConnectTimeout,
    #[error("link failure: {0}")]
    Link(#[from] LinkError),
    #[error("socket failure: {0}")]
    Socket(String),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("message codec failure: {0}")]
    Codec(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("not connected")]
    NotConnected,
}

impl From<crate::net::CodecError> for TransportError {
    fn from(err: crate::net::CodecError) -> Self {
        TransportError::Codec(err.to_string())
    }
}

impl From<crate::net::ChunkError> for TransportError {
    fn from(err: crate::net::ChunkError) -> Self {
        TransportError::Codec(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    PeerConnected { peer_id: PeerId, name: String },
    PeerDisconnected { peer_id: PeerId, reason: String },
    MessageReceived { from: PeerId, message: NetworkMessage },
    Error(TransportError),
}

/// Uniform surface over the radio link and the relayed socket.
pub trait Transport {
    fn kind(&self) -> TransportKind;

    fn initialize(&mut self) -> Result<(), TransportError>;

    fn start_hosting(&mut self, config: &TransportConfig) -> Result<(), TransportError>;

    fn join_session(&mut self, config: &TransportConfig) -> Result<(), TransportError>;

    /// Sends to one peer. Sending to an unknown peer is logged and ignored.
    fn send(&mut self, message: NetworkMessage, peer_id: &str) -> Result<(), TransportError>;

    fn broadcast(&mut self, message: NetworkMessage) -> Result<(), TransportError>;

    /// Advances timers and pumps the underlying link.
    fn poll(&mut self, now: Instant);

    fn drain_events(&mut self) -> Drain<'_, TransportEvent>;

    fn disconnect(&mut self);

    fn destroy(&mut self);

    fn state(&self) -> ConnectionState;

    fn role(&self) -> Option<SessionRole>;

    fn local_peer_id(&self) -> &PeerId;

    fn connected_peers(&self) -> Vec<PeerId>;

    /// Smoothed round-trip time in milliseconds, zero if unknown.
    fn latency(&self, peer_id: &str) -> f32;

    fn stats(&self) -> NetworkStats;

    /// Shareable session code, when the transport has one.
    fn session_code(&self) -> Option<&str> {
        None
    }
}
