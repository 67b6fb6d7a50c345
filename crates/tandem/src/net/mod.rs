mod chunk;
mod connection;
mod latency;
mod protocol;
mod stats;

pub use chunk::{
    CHUNK_HEADER_SIZE, ChunkError, ChunkHeader, ChunkReassembler, MAX_CHUNKS, REASSEMBLY_TIMEOUT,
    chunk_message,
};
pub use connection::{ConnectionState, PeerInfo, PeerTable, SessionRole};
pub use latency::{PING_INTERVAL, PingSchedule, PingTracker};
pub use protocol::{
    BodyState, CodecError, DEFAULT_TICK_RATE, DespawnReason, Drag, EntitySpawn, GamePhase,
    GameStateDelta, GameSyncState, MessageHeader, MessageType, NetEntityId, NetworkMessage,
    PROTOCOL_VERSION, Payload, PeerId, PlayerInput, SpawnTransform, StateDelta, StateSnapshot,
    Tap, Touch, TouchPhase, current_time_ms, generate_peer_id,
};
pub use stats::{NetworkStats, PacketLossSimulation, rand_percent, rand_u64};
