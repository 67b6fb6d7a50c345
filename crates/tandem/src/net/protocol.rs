use std::collections::BTreeMap;

use glam::{Vec2, Vec3};
use rkyv::rancor;
use rkyv::util::AlignedVec;
use serde::{Deserialize, Serialize};

use crate::entity::BodyHandle;

pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Identifies a connected participant. Generated locally, never reused.
pub type PeerId = String;

/// Identifies a replicated simulation object independently of any local handle.
pub type NetEntityId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    HandshakeRequest,
    HandshakeResponse,
    StateSnapshot,
    StateDelta,
    InputEvent,
    EntitySpawn,
    EntityDespawn,
    GameEvent,
    GameStart,
    GamePause,
    GameResume,
    GameEnd,
    Ping,
    Pong,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::HandshakeRequest => "handshake_request",
            MessageType::HandshakeResponse => "handshake_response",
            MessageType::StateSnapshot => "state_snapshot",
            MessageType::StateDelta => "state_delta",
            MessageType::InputEvent => "input_event",
            MessageType::EntitySpawn => "entity_spawn",
            MessageType::EntityDespawn => "entity_despawn",
            MessageType::GameEvent => "game_event",
            MessageType::GameStart => "game_start",
            MessageType::GamePause => "game_pause",
            MessageType::GameResume => "game_resume",
            MessageType::GameEnd => "game_end",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct BodyState {
    pub id: BodyHandle,
    pub net_entity_id: NetEntityId,
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub is_awake: bool,
}

impl BodyState {
    pub fn at_rest(id: BodyHandle, net_entity_id: impl Into<NetEntityId>, position: Vec2) -> Self {
        Self {
            id,
            net_entity_id: net_entity_id.into(),
            position,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            is_awake: true,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Loading,
    #[default]
    Ready,
    Playing,
    Paused,
    Won,
    Lost,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct GameSyncState {
    pub score: i64,
    pub lives: i32,
    pub time: f32,
    pub phase: GamePhase,
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
}

impl Default for GameSyncState {
    fn default() -> Self {
        Self {
            score: 0,
            lives: 3,
            time: 0.0,
            phase: GamePhase::Ready,
            variables: BTreeMap::new(),
        }
    }
}

impl GameSyncState {
    pub fn apply(&mut self, delta: &GameStateDelta) {
        if let Some(score) = delta.score {
            self.score = score;
        }
        if let Some(lives) = delta.lives {
            self.lives = lives;
        }
        if let Some(time) = delta.time {
            self.time = time;
        }
        if let Some(phase) = delta.phase {
            self.phase = phase;
        }
        if let Some(variables) = &delta.variables {
            self.variables
                .extend(variables.iter().map(|(k, v)| (k.clone(), *v)));
        }
    }
}

/// Partial game state; `None` fields are left untouched on merge.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct GameStateDelta {
    pub score: Option<i64>,
    pub lives: Option<i32>,
    pub time: Option<f32>,
    pub phase: Option<GamePhase>,
    pub variables: Option<BTreeMap<String, f64>>,
}

impl GameStateDelta {
    pub fn is_empty(&self) -> bool {
        self.score.is_none()
            && self.lives.is_none()
            && self.time.is_none()
            && self.phase.is_none()
            && self.variables.is_none()
    }
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub tick_id: u32,
    pub bodies: Vec<BodyState>,
    pub game_state: GameSyncState,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    pub tick_id: u32,
    pub base_tick_id: u32,
    pub changed_bodies: Vec<BodyState>,
    pub added_bodies: Vec<BodyState>,
    pub removed_body_ids: Vec<NetEntityId>,
    pub game_state_delta: Option<GameStateDelta>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.changed_bodies.is_empty()
            && self.added_bodies.is_empty()
            && self.removed_body_ids.is_empty()
            && self.game_state_delta.as_ref().is_none_or(|d| d.is_empty())
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TouchPhase {
    Began,
    Moved,
    Ended,
    Cancelled,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Touch {
    pub id: u32,
    pub phase: TouchPhase,
    pub position: Vec2,
    pub world_position: Option<Vec2>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Tap {
    pub position: Vec2,
    pub world_position: Vec2,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Drag {
    pub start: Vec2,
    pub current: Vec2,
    pub world_start: Vec2,
    pub world_current: Vec2,
}

/// One participant's control intent for a single tick.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInput {
    pub touches: Vec<Touch>,
    pub movement: Option<Vec2>,
    pub actions: BTreeMap<String, bool>,
    pub accelerometer: Option<Vec3>,
    pub tap: Option<Tap>,
    pub drag: Option<Drag>,
}

impl PlayerInput {
    pub fn with_movement(movement: Vec2) -> Self {
        Self {
            movement: Some(movement),
            ..Default::default()
        }
    }

    #[inline]
    pub fn action(&self, name: &str) -> bool {
        self.actions.get(name).copied().unwrap_or(false)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct SpawnTransform {
    pub position: Vec2,
    pub angle: f32,
    pub scale: Vec2,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct EntitySpawn {
    pub net_entity_id: NetEntityId,
    pub template_id: String,
    pub transform: SpawnTransform,
    pub initial_velocity: Option<Vec2>,
    pub owner_peer_id: Option<PeerId>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DespawnReason {
    Destroyed,
    Pooled,
    OutOfBounds,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Payload {
    HandshakeRequest {
        device_name: String,
        game_version: String,
    },
    HandshakeResponse {
        accepted: bool,
        assigned_peer_id: PeerId,
        host_name: String,
        game_state: GameSyncState,
        reject_reason: Option<String>,
    },
    StateSnapshot(StateSnapshot),
    StateDelta(StateDelta),
    InputEvent {
        tick_id: u32,
        player_id: PeerId,
        inputs: PlayerInput,
    },
    EntitySpawn(EntitySpawn),
    EntityDespawn {
        net_entity_id: NetEntityId,
        reason: Option<DespawnReason>,
    },
    GameEvent {
        event_name: String,
        data: BTreeMap<String, String>,
    },
    GameStart,
    GamePause,
    GameResume,
    GameEnd {
        outcome: Option<GamePhase>,
    },
    Ping,
    Pong,
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::HandshakeRequest { .. } => MessageType::HandshakeRequest,
            Payload::HandshakeResponse { .. } => MessageType::HandshakeResponse,
            Payload::StateSnapshot(_) => MessageType::StateSnapshot,
            Payload::StateDelta(_) => MessageType::StateDelta,
            Payload::InputEvent { .. } => MessageType::InputEvent,
            Payload::EntitySpawn(_) => MessageType::EntitySpawn,
            Payload::EntityDespawn { .. } => MessageType::EntityDespawn,
            Payload::GameEvent { .. } => MessageType::GameEvent,
            Payload::GameStart => MessageType::GameStart,
            Payload::GamePause => MessageType::GamePause,
            Payload::GameResume => MessageType::GameResume,
            Payload::GameEnd { .. } => MessageType::GameEnd,
            Payload::Ping => MessageType::Ping,
            Payload::Pong => MessageType::Pong,
        }
    }
}

/// Envelope fields shared by every game message.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub timestamp: u64,
    pub sequence: u32,
    pub sender_id: PeerId,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
pub struct NetworkMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetworkMessage {
    /// Builds a message stamped with the current time. Sequence and sender are
    /// overwritten by the transport on send.
    pub fn new(payload: Payload) -> Self {
        Self {
            header: MessageHeader {
                timestamp: current_time_ms(),
                sequence: 0,
                sender_id: PeerId::new(),
            },
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn sender(&self) -> &PeerId {
        &self.header.sender_id
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.to_vec())
            .map_err(CodecError::Serialize)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        // Reassembled buffers carry no alignment guarantee.
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(CodecError::Deserialize)
    }

    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Fresh peer id such as `ble-18c2f0a9e41-7d3a90c2`. Unique per process.
pub fn generate_peer_id(prefix: &str) -> PeerId {
    format!(
        "{}-{:x}-{:08x}",
        prefix,
        current_time_ms(),
        super::stats::rand_u64() as u32
    )
}

pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
