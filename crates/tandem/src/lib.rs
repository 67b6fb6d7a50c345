pub mod entity;
pub mod net;
pub mod session;
pub mod sync;
pub mod transport;

pub use entity::{BodyHandle, NetEntityRecord, NetEntityRegistry};
pub use net::{
    BodyState, ConnectionState, DEFAULT_TICK_RATE, EntitySpawn, GamePhase, GameStateDelta,
    GameSyncState, NetEntityId, NetworkMessage, NetworkStats, PROTOCOL_VERSION, Payload, PeerId,
    PlayerInput, SessionRole, StateDelta, StateSnapshot,
};
pub use session::{GameSession, NetworkGameLoop, SessionConfig, SessionError, SessionEvent};
pub use sync::{DynamicBody, SimulationAdapter, SyncConfig, Synchronizer};
pub use transport::{Transport, TransportConfig, TransportError, TransportEvent, TransportKind};
